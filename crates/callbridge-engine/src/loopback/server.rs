use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use callbridge_core::ChannelArgs;
use parking_lot::Mutex;

use super::call::{ClientCall, LoopbackCall};
use super::{parse_port, DialError, EngineShared, InboundCall};
use crate::{
    CallErrorCode, CallId, CallSlot, NativeCall, NativeQueue, NativeServer, ServerCredentials, Tag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    ShuttingDown,
    Destroyed,
}

#[derive(Debug)]
struct ServerCore {
    phase: Phase,
    queue: Option<Arc<NativeQueue>>,
    ports: Vec<u16>,
    pending: VecDeque<(CallSlot, Tag)>,
    backlog: VecDeque<Arc<LoopbackCall>>,
    in_flight: HashMap<CallId, Arc<LoopbackCall>>,
    shutdown_tags: Vec<Tag>,
}

impl ServerCore {
    /// Pairs queued calls with pending accept requests, FIFO on both sides.
    fn match_pending(&mut self) {
        if self.phase != Phase::Started {
            return;
        }
        let Some(queue) = self.queue.clone() else {
            return;
        };
        while !self.pending.is_empty() && !self.backlog.is_empty() {
            let (Some((slot, tag)), Some(call)) = (self.pending.pop_front(), self.backlog.pop_front())
            else {
                break;
            };
            slot.fill(call.to_raw());
            self.in_flight.insert(call.id(), call);
            queue.post(tag, true);
        }
    }

    fn flush_shutdown_tags(&mut self) {
        if self.phase != Phase::ShuttingDown || !self.in_flight.is_empty() {
            return;
        }
        let tags = mem::take(&mut self.shutdown_tags);
        if let Some(queue) = &self.queue {
            for tag in tags {
                queue.post(tag, true);
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct ServerShared {
    id: u64,
    args: ChannelArgs,
    engine: Arc<EngineShared>,
    core: Mutex<ServerCore>,
}

impl ServerShared {
    pub(crate) fn args(&self) -> &ChannelArgs {
        &self.args
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.core.lock().in_flight.len()
    }

    pub(crate) fn pending_accepts(&self) -> usize {
        self.core.lock().pending.len()
    }

    pub(crate) fn accept_inbound(self: &Arc<Self>, inbound: InboundCall) -> Result<ClientCall, DialError> {
        let mut core = self.core.lock();
        if core.phase != Phase::Started {
            return Err(DialError::Unavailable);
        }
        let queue = core.queue.clone().ok_or(DialError::Unavailable)?;
        let call = Arc::new(LoopbackCall::new(
            CallId(self.engine.next_call_id()),
            inbound,
            Arc::downgrade(self),
            queue,
        ));
        tracing::trace!(native_server = self.id, call = %call.id(), "Inbound call queued");
        core.backlog.push_back(Arc::clone(&call));
        core.match_pending();
        Ok(ClientCall::new(call))
    }

    /// Removes an ended call; completes a pending graceful shutdown once the
    /// last in-flight call is gone.
    pub(crate) fn call_ended(&self, id: CallId) {
        let mut core = self.core.lock();
        core.in_flight.remove(&id);
        core.backlog.retain(|call| call.id() != id);
        core.flush_shutdown_tags();
    }

    fn bind(self: &Arc<Self>, address: &str, secure: bool) -> u16 {
        let mut core = self.core.lock();
        if core.phase != Phase::Created {
            tracing::warn!(native_server = self.id, address, "Ports must be added before start");
            return 0;
        }
        let Some(requested) = parse_port(address) else {
            tracing::warn!(native_server = self.id, address, "Unparseable listen address");
            return 0;
        };
        let port = self.engine.bind(requested, self, secure);
        if port == 0 {
            tracing::warn!(native_server = self.id, address, "Port already in use");
        } else {
            core.ports.push(port);
        }
        port
    }
}

/// Native server handle returned by [`LoopbackEngine`](super::LoopbackEngine).
#[derive(Debug)]
pub(crate) struct LoopbackServer {
    shared: Arc<ServerShared>,
}

impl LoopbackServer {
    pub(crate) fn new(id: u64, args: ChannelArgs, engine: Arc<EngineShared>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                id,
                args,
                engine,
                core: Mutex::new(ServerCore {
                    phase: Phase::Created,
                    queue: None,
                    ports: Vec::new(),
                    pending: VecDeque::new(),
                    backlog: VecDeque::new(),
                    in_flight: HashMap::new(),
                    shutdown_tags: Vec::new(),
                }),
            }),
        }
    }

    fn live_calls(&self) -> Vec<Arc<LoopbackCall>> {
        self.shared.core.lock().in_flight.values().cloned().collect()
    }
}

impl NativeServer for LoopbackServer {
    fn register_completion_queue(&self, queue: Arc<NativeQueue>) {
        self.shared.core.lock().queue = Some(queue);
    }

    fn add_insecure_port(&self, address: &str) -> u16 {
        self.shared.bind(address, false)
    }

    fn add_secure_port(&self, address: &str, credentials: &ServerCredentials) -> u16 {
        if credentials.key_cert_pairs().is_empty() {
            tracing::warn!(native_server = self.shared.id, address, "Secure port without key/cert pair");
            return 0;
        }
        self.shared.bind(address, true)
    }

    fn start(&self) {
        let mut core = self.shared.core.lock();
        if core.phase == Phase::Created {
            core.phase = Phase::Started;
            core.match_pending();
        }
    }

    fn request_call(&self, slot: CallSlot, tag: Tag) -> Result<(), CallErrorCode> {
        let mut core = self.shared.core.lock();
        match core.phase {
            Phase::ShuttingDown | Phase::Destroyed => return Err(CallErrorCode::ServerShutdown),
            Phase::Created | Phase::Started => {}
        }
        if core.queue.is_none() {
            return Err(CallErrorCode::NoCompletionQueue);
        }
        core.pending.push_back((slot, tag));
        core.match_pending();
        Ok(())
    }

    fn shutdown_and_notify(&self, tag: Tag) {
        let backlog = {
            let mut core = self.shared.core.lock();
            if core.phase == Phase::Destroyed {
                return;
            }
            let mut backlog = VecDeque::new();
            if core.phase != Phase::ShuttingDown {
                core.phase = Phase::ShuttingDown;
                let pending = mem::take(&mut core.pending);
                if let Some(queue) = &core.queue {
                    for (_, pending_tag) in pending {
                        queue.post(pending_tag, false);
                    }
                }
                backlog = mem::take(&mut core.backlog);
            }
            core.shutdown_tags.push(tag);
            core.flush_shutdown_tags();
            backlog
        };
        for call in backlog {
            call.cancel();
        }
    }

    fn cancel_all_calls(&self) {
        for call in self.live_calls() {
            call.cancel();
        }
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        let (calls, ports) = {
            let mut core = self.shared.core.lock();
            core.phase = Phase::Destroyed;
            let pending = mem::take(&mut core.pending);
            if let Some(queue) = &core.queue {
                for (_, tag) in pending {
                    queue.post(tag, false);
                }
            }
            let mut calls: Vec<Arc<LoopbackCall>> = core.in_flight.drain().map(|(_, c)| c).collect();
            calls.extend(core.backlog.drain(..));
            (calls, mem::take(&mut core.ports))
        };
        for call in calls {
            call.cancel();
        }
        self.shared.engine.release_ports(&ports);
        self.shared.engine.record_destroyed();
        tracing::debug!(native_server = self.shared.id, "Loopback server destroyed");
    }
}
