use std::collections::VecDeque;
use std::time::{Duration, Instant};

use devshadow_domain::{AttributePath, ClusterPath, CommandId, DataValue, DataVersion, EndpointId};

/// Parameters that must match structurally for two reads to batch together
/// (§4.3). `fabric_filtered` mirrors the one read parameter the core's
/// batching rule actually distinguishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadParams {
    pub fabric_filtered: bool,
}

/// Maximum `AttributeRequestPath`s batched into one read (§4.3).
const MAX_READ_BATCH: usize = 9;

const READ_RETRY_BUDGET: u8 = 2;
const INVOKE_BUSY_RETRY_BUDGET: u8 = 5;

#[derive(Debug, Clone)]
enum Item {
    Read {
        /// Ids of every original `enqueue_read` call folded into this item,
        /// preserved across batching and retries so each caller can still
        /// be resolved (§4.3, §9 per-caller reply).
        ids: Vec<u64>,
        paths: Vec<AttributePath>,
        params: ReadParams,
        retries_left: u8,
    },
    Write {
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
        expected_generation: Option<u64>,
    },
    Invoke {
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        /// Client-committed deadline, fixed at enqueue time and carried
        /// unchanged through every busy retry (§4.3 "timed-invoke
        /// deadlines").
        cutoff: Option<Instant>,
        expected_generation: Option<u64>,
        busy_retries_left: u8,
    },
}

#[derive(Debug, Clone)]
struct QueuedItem {
    id: u64,
    item: Item,
}

/// What `dequeue_ready` hands back: the head item after batching, ready to
/// execute against the transport.
#[derive(Debug, Clone)]
pub enum Ready {
    Read {
        id: u64,
        /// Every queued item's id folded into this batch, `id` included,
        /// in merge order. A caller whose own read got merged into someone
        /// else's batch is still owed a reply — it listens for its id here.
        merged_ids: Vec<u64>,
        paths: Vec<AttributePath>,
        params: ReadParams,
        retries_left: u8,
    },
    Write {
        id: u64,
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
        expected_generation: Option<u64>,
    },
    /// The invoke's deadline already elapsed; fail it without issuing.
    InvokeExpired {
        id: u64,
        expected_generation: Option<u64>,
    },
    Invoke {
        id: u64,
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        /// Remaining time until `cutoff`, forwarded as the actual invoke
        /// timeout — not the originally-requested duration (§4.3).
        timeout: Option<Duration>,
        /// The fixed deadline itself, so a busy retry can put this item
        /// back without resetting it.
        cutoff: Option<Instant>,
        expected_generation: Option<u64>,
        busy_retries_left: u8,
    },
}

/// Result of [`WorkQueue::enqueue_read`]: whether the caller's request
/// became a freshly queued item or was folded into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRead {
    New(u64),
    Duplicate(u64),
}

impl Ready {
    pub fn id(&self) -> u64 {
        match self {
            Ready::Read { id, .. } => *id,
            Ready::Write { id, .. } => *id,
            Ready::InvokeExpired { id, .. } => *id,
            Ready::Invoke { id, .. } => *id,
        }
    }
}

/// C3: the serialized per-device work queue (§4.3).
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<QueuedItem>,
    next_id: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Enqueues a read unless an already-queued read (with the same
    /// params) already requests every path in `paths` — in which case it
    /// is folded into that item as a duplicate (§4.3) and its id returned
    /// so the caller can still be notified when it completes.
    pub fn enqueue_read(&mut self, paths: Vec<AttributePath>, params: ReadParams) -> EnqueueRead {
        for queued in &self.items {
            if let Item::Read {
                paths: existing,
                params: existing_params,
                ids,
                ..
            } = &queued.item
            {
                if *existing_params == params && paths.iter().all(|p| existing.contains(p)) {
                    return EnqueueRead::Duplicate(ids[0]);
                }
            }
        }
        let id = self.alloc_id();
        self.items.push_back(QueuedItem {
            id,
            item: Item::Read {
                ids: vec![id],
                paths,
                params,
                retries_left: READ_RETRY_BUDGET,
            },
        });
        EnqueueRead::New(id)
    }

    /// Enqueues a write. If a write to the same path is already queued
    /// (not yet in flight), it is replaced in place — last-writer-wins
    /// within the queue window (§4.3).
    pub fn enqueue_write(
        &mut self,
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
        expected_generation: Option<u64>,
    ) -> u64 {
        for queued in self.items.iter_mut() {
            if let Item::Write { path: existing, .. } = &queued.item {
                if *existing == path {
                    queued.item = Item::Write {
                        path,
                        value,
                        data_version,
                        expected_generation,
                    };
                    return queued.id;
                }
            }
        }
        let id = self.alloc_id();
        self.items.push_back(QueuedItem {
            id,
            item: Item::Write {
                path,
                value,
                data_version,
                expected_generation,
            },
        });
        id
    }

    /// Enqueues an invoke. Never batched or deduplicated (§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_invoke(
        &mut self,
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        timeout: Option<Duration>,
        expected_generation: Option<u64>,
    ) -> u64 {
        let id = self.alloc_id();
        let cutoff = timeout.map(|t| Instant::now() + t);
        self.items.push_back(QueuedItem {
            id,
            item: Item::Invoke {
                endpoint,
                cluster,
                command,
                fields,
                cutoff,
                expected_generation,
                busy_retries_left: INVOKE_BUSY_RETRY_BUDGET,
            },
        });
        id
    }

    /// Pops the head item, batching compatible reads behind it per §4.3,
    /// and returns it ready for execution.
    pub fn dequeue_ready(&mut self) -> Option<Ready> {
        let head = self.items.pop_front()?;
        match head.item {
            Item::Read {
                mut paths,
                params,
                retries_left,
                ids: mut merged_ids,
            } => {
                loop {
                    if paths.len() >= MAX_READ_BATCH {
                        break;
                    }
                    let batches = matches!(
                        self.items.front(),
                        Some(q) if matches!(&q.item, Item::Read { params: p, .. } if *p == params)
                    );
                    if !batches {
                        break;
                    }
                    let next = self.items.pop_front().unwrap();
                    if let Item::Read {
                        paths: mut next_paths,
                        ids: next_ids,
                        ..
                    } = next.item
                    {
                        let room = MAX_READ_BATCH - paths.len();
                        if next_paths.len() <= room {
                            paths.extend(next_paths);
                            merged_ids.extend(next_ids);
                        } else {
                            // This caller's request straddles the batch
                            // boundary; its ids stay with the remainder and
                            // resolve only once that piece is served.
                            let remainder = next_paths.split_off(room);
                            paths.extend(next_paths);
                            self.items.push_front(QueuedItem {
                                id: next.id,
                                item: Item::Read {
                                    ids: next_ids,
                                    paths: remainder,
                                    params,
                                    retries_left: READ_RETRY_BUDGET,
                                },
                            });
                            break;
                        }
                    }
                }
                Some(Ready::Read {
                    id: head.id,
                    merged_ids,
                    paths,
                    params,
                    retries_left,
                })
            }
            Item::Write {
                path,
                value,
                data_version,
                expected_generation,
            } => Some(Ready::Write {
                id: head.id,
                path,
                value,
                data_version,
                expected_generation,
            }),
            Item::Invoke {
                endpoint,
                cluster,
                command,
                fields,
                cutoff,
                expected_generation,
                busy_retries_left,
            } => {
                let now = Instant::now();
                if let Some(cutoff) = cutoff {
                    if now > cutoff {
                        return Some(Ready::InvokeExpired {
                            id: head.id,
                            expected_generation,
                        });
                    }
                }
                // Forward the time remaining until the deadline, not the
                // duration originally requested at enqueue (§4.3).
                let timeout = cutoff.map(|c| c.saturating_duration_since(now));
                Some(Ready::Invoke {
                    id: head.id,
                    endpoint,
                    cluster,
                    command,
                    fields,
                    timeout,
                    cutoff,
                    expected_generation,
                    busy_retries_left,
                })
            }
        }
    }

    /// Re-inserts a read at the head with one fewer retry, or `None` if
    /// the budget is exhausted.
    pub fn retry_read(
        &mut self,
        merged_ids: Vec<u64>,
        paths: Vec<AttributePath>,
        params: ReadParams,
        retries_left: u8,
    ) -> bool {
        if retries_left == 0 {
            return false;
        }
        let id = merged_ids[0];
        self.items.push_front(QueuedItem {
            id,
            item: Item::Read {
                ids: merged_ids,
                paths,
                params,
                retries_left: retries_left - 1,
            },
        });
        true
    }

    /// Puts a dequeued write back at the head under its original id,
    /// unchanged — used when no session was available to attempt it, which
    /// is not a retry and must not allocate a fresh id (§9 per-caller
    /// reply).
    pub fn requeue_write(
        &mut self,
        id: u64,
        path: AttributePath,
        value: DataValue,
        data_version: Option<DataVersion>,
        expected_generation: Option<u64>,
    ) {
        self.items.push_front(QueuedItem {
            id,
            item: Item::Write {
                path,
                value,
                data_version,
                expected_generation,
            },
        });
    }

    /// Re-inserts a busy invoke at the head with one fewer retry, or
    /// `None` if the budget is exhausted. `cutoff` is carried through
    /// unchanged — a busy retry must not extend a timed invoke's
    /// client-committed deadline (§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn retry_invoke_busy(
        &mut self,
        id: u64,
        endpoint: EndpointId,
        cluster: ClusterPath,
        command: CommandId,
        fields: DataValue,
        cutoff: Option<Instant>,
        expected_generation: Option<u64>,
        busy_retries_left: u8,
    ) -> bool {
        if busy_retries_left == 0 {
            return false;
        }
        self.items.push_front(QueuedItem {
            id,
            item: Item::Invoke {
                endpoint,
                cluster,
                command,
                fields,
                cutoff,
                expected_generation,
                busy_retries_left: busy_retries_left - 1,
            },
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId};

    fn path(attr: u32) -> AttributePath {
        AttributePath::new(EndpointId(1), ClusterId(6), AttributeId(attr))
    }

    #[test]
    fn duplicate_read_is_dropped() {
        let mut q = WorkQueue::new();
        let original = q.enqueue_read(vec![path(0)], ReadParams::default());
        let dup = q.enqueue_read(vec![path(0)], ReadParams::default());
        match (original, dup) {
            (EnqueueRead::New(id), EnqueueRead::Duplicate(dup_id)) => assert_eq!(id, dup_id),
            other => panic!("expected a duplicate matching the original id: {other:?}"),
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn write_then_read_same_path_does_not_merge() {
        let mut q = WorkQueue::new();
        q.enqueue_write(path(0), DataValue::Boolean(true), None, None);
        q.enqueue_read(vec![path(0)], ReadParams::default());
        assert_eq!(q.len(), 2);

        let ready = q.dequeue_ready().unwrap();
        assert!(matches!(ready, Ready::Write { .. }));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn second_write_to_same_path_replaces_first() {
        let mut q = WorkQueue::new();
        q.enqueue_write(path(0), DataValue::Boolean(false), None, None);
        q.enqueue_write(path(0), DataValue::Boolean(true), None, None);
        assert_eq!(q.len(), 1);

        let ready = q.dequeue_ready().unwrap();
        match ready {
            Ready::Write { value, .. } => assert_eq!(value, DataValue::Boolean(true)),
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn reads_batch_up_to_nine_paths() {
        let mut q = WorkQueue::new();
        for i in 0..12 {
            q.enqueue_read(vec![path(i)], ReadParams::default());
        }
        let ready = q.dequeue_ready().unwrap();
        match ready {
            Ready::Read { paths, .. } => assert_eq!(paths.len(), 9),
            _ => panic!("expected read"),
        }
        // Remaining 3 paths stay queued as one item.
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn reads_with_different_params_do_not_batch() {
        let mut q = WorkQueue::new();
        q.enqueue_read(vec![path(0)], ReadParams { fabric_filtered: false });
        q.enqueue_read(vec![path(1)], ReadParams { fabric_filtered: true });
        let ready = q.dequeue_ready().unwrap();
        match ready {
            Ready::Read { paths, .. } => assert_eq!(paths.len(), 1),
            _ => panic!("expected read"),
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn invoke_past_cutoff_expires_without_issuing() {
        let mut q = WorkQueue::new();
        q.enqueue_invoke(
            EndpointId(1),
            ClusterPath::new(EndpointId(1), ClusterId(6)),
            CommandId(0),
            DataValue::Null,
            Some(Duration::from_millis(1)),
            None,
        );
        std::thread::sleep(Duration::from_millis(5));
        let ready = q.dequeue_ready().unwrap();
        assert!(matches!(ready, Ready::InvokeExpired { .. }));
    }

    #[test]
    fn retry_read_preserves_head_position() {
        let mut q = WorkQueue::new();
        q.enqueue_read(vec![path(0)], ReadParams::default());
        q.enqueue_read(vec![path(1)], ReadParams { fabric_filtered: true });
        let ready = q.dequeue_ready().unwrap();
        if let Ready::Read { merged_ids, paths, params, retries_left, .. } = ready {
            assert!(q.retry_read(merged_ids, paths, params, retries_left));
        }
        let next = q.dequeue_ready().unwrap();
        match next {
            Ready::Read { paths, .. } => assert_eq!(paths[0], path(0)),
            _ => panic!("expected retried read at head"),
        }
    }

    #[test]
    fn invoke_busy_retry_budget_is_exhausted_after_five() {
        let mut q = WorkQueue::new();
        q.enqueue_invoke(
            EndpointId(1),
            ClusterPath::new(EndpointId(1), ClusterId(6)),
            CommandId(0),
            DataValue::Null,
            None,
            None,
        );
        let mut busy_retries_left = match q.dequeue_ready().unwrap() {
            Ready::Invoke { busy_retries_left, .. } => busy_retries_left,
            _ => panic!("expected invoke"),
        };
        let mut retried = 0;
        while q.retry_invoke_busy(
            0,
            EndpointId(1),
            ClusterPath::new(EndpointId(1), ClusterId(6)),
            CommandId(0),
            DataValue::Null,
            None,
            None,
            busy_retries_left,
        ) {
            retried += 1;
            busy_retries_left = match q.dequeue_ready().unwrap() {
                Ready::Invoke { busy_retries_left, .. } => busy_retries_left,
                _ => panic!("expected invoke"),
            };
        }
        assert_eq!(retried, 5);
    }
}
