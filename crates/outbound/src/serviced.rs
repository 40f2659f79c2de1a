use std::any::Any;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;
use reso_outbound_wire::{DnsFlags, DnsHeader, Edns, WireWriter};
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::config::EngineConfig;
use crate::error::OutboundError;
use crate::memory::MemoryAccounting;
use crate::tcp_pool::TcpPool;
use crate::udp_pool::UdpPortPool;

/// Equality predicate over subscriber arguments, supplied fresh by the
/// caller on every `serviced_query` call (mirrors the source's
/// `arg_compare` contract, §9).
pub type ArgEq = fn(&dyn Any, &dyn Any) -> bool;

/// Dedup key for a serviced query (§3): qbuf (flags + question) plus
/// destination plus whether DNSSEC records are wanted. Two submissions
/// that differ only in flags — e.g. one wants the CD bit and one doesn't
/// — are distinct entries and never coalesce onto the same wire send.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServicedKey {
    pub qname: Bytes,
    pub qtype: u16,
    pub qclass: u16,
    pub flags: DnsFlags,
    pub destination: SocketAddr,
    pub dnssec: bool,
}

/// `initial` never appears as a stored state: a freshly-created entry
/// starts directly in `UdpEdns` or `UdpPlain` depending on `dnssec`,
/// exactly as §4.4's diagram's two `initial` edges imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportState {
    UdpEdns,
    UdpPlain,
    TcpEdns,
    TcpPlain,
}

struct Subscriber {
    id: u64,
    arg: Box<dyn Any + Send>,
    arg_eq: ArgEq,
    tx: oneshot::Sender<Result<Bytes, OutboundError>>,
}

struct EntryState {
    subscribers: VecDeque<Subscriber>,
    next_id: u64,
    driver: Option<tokio::task::AbortHandle>,
}

/// Keyed index of in-flight serviced queries (§4.4), the hot path. Reuses
/// the `DashMap<K, Arc<...>>` shape `reso-inflight`'s `Inflight` is built
/// on, but a `Shared<BoxFuture>` can't give exact-order multi-subscriber
/// fan-out or independent per-subscriber `stop`, so each entry owns an
/// explicit `VecDeque` of subscribers instead of one shared future.
pub struct ServicedIndex {
    map: DashMap<ServicedKey, Arc<Mutex<EntryState>>>,
    udp_pool: Arc<UdpPortPool>,
    tcp_pool: Arc<TcpPool>,
    config: Arc<EngineConfig>,
    memory: Arc<MemoryAccounting>,
}

/// Per-subscriber overhead charged against the memory budget, the same
/// accounting shape as [`crate::pending::PendingTable`].
const SUBSCRIBER_OVERHEAD: usize = 64;

impl ServicedIndex {
    pub fn new(
        udp_pool: Arc<UdpPortPool>,
        tcp_pool: Arc<TcpPool>,
        config: Arc<EngineConfig>,
        memory: Arc<MemoryAccounting>,
    ) -> Arc<Self> {
        Arc::new(Self {
            map: DashMap::new(),
            udp_pool,
            tcp_pool,
            config,
            memory,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Attach to an existing entry or create a new one (§4.4). Rejects a
    /// submission whose `arg` is equal, under `arg_eq`, to an already-
    /// registered subscriber's argument.
    pub fn serviced_query(
        self: &Arc<Self>,
        qname: Bytes,
        qtype: u16,
        qclass: u16,
        flags: DnsFlags,
        dnssec: bool,
        destination: SocketAddr,
        arg: Box<dyn Any + Send>,
        arg_eq: ArgEq,
    ) -> Result<ServicedHandle, OutboundError> {
        let key = ServicedKey {
            qname: qname.clone(),
            qtype,
            qclass,
            flags,
            destination,
            dnssec,
        };
        let (tx, rx) = oneshot::channel();

        let (entry, id, spawn_driver) = match self.map.entry(key.clone()) {
            MapEntry::Occupied(occ) => {
                let entry = occ.get().clone();
                let id = {
                    let mut guard = entry.lock();
                    if guard
                        .subscribers
                        .iter()
                        .any(|s| (s.arg_eq)(s.arg.as_ref(), arg.as_ref()))
                    {
                        return Err(OutboundError::Duplicate);
                    }
                    let id = guard.next_id;
                    guard.next_id += 1;
                    guard.subscribers.push_back(Subscriber { id, arg, arg_eq, tx });
                    id
                };
                self.memory.add(SUBSCRIBER_OVERHEAD);
                (entry, id, false)
            }
            MapEntry::Vacant(vac) => {
                let entry = Arc::new(Mutex::new(EntryState {
                    subscribers: VecDeque::new(),
                    next_id: 1,
                    driver: None,
                }));
                entry.lock().subscribers.push_back(Subscriber {
                    id: 0,
                    arg,
                    arg_eq,
                    tx,
                });
                vac.insert(entry.clone());
                self.memory.add(qname.len() + SUBSCRIBER_OVERHEAD);
                (entry, 0, true)
            }
        };

        if spawn_driver {
            let index = self.clone();
            let driver_key = key.clone();
            let driver_entry = entry.clone();
            let join = tokio::spawn(async move {
                index.drive(driver_key, driver_entry, qname, qtype, qclass).await;
            });
            entry.lock().driver = Some(join.abort_handle());
        }

        Ok(ServicedHandle {
            index: self.clone(),
            key,
            entry,
            id,
            rx,
        })
    }

    async fn drive(
        self: Arc<Self>,
        key: ServicedKey,
        entry: Arc<Mutex<EntryState>>,
        qname: Bytes,
        qtype: u16,
        qclass: u16,
    ) {
        let question = match build_question(&qname, qtype, qclass) {
            Ok(q) => q,
            Err(e) => {
                self.finish(&key, &entry, Err(OutboundError::Protocol(e.to_string())))
                    .await;
                return;
            }
        };

        let mut state = if key.dnssec {
            TransportState::UdpEdns
        } else {
            TransportState::UdpPlain
        };
        let mut udp_retries = 0u32;

        let outcome = loop {
            let edns = matches!(state, TransportState::UdpEdns | TransportState::TcpEdns).then(|| {
                let payload_size = self.config.buf_size.min(u16::MAX as usize) as u16;
                Edns::for_query(payload_size, key.dnssec)
            });

            let packet = match build_packet(key.flags, &question, edns) {
                Ok(p) => p,
                Err(e) => break Err(OutboundError::Protocol(e.to_string())),
            };

            let send_result = match state {
                TransportState::UdpEdns | TransportState::UdpPlain => {
                    self.udp_pool
                        .send(
                            packet.to_vec(),
                            key.destination,
                            Duration::from_millis(self.config.serviced_udp_timeout_ms),
                        )
                        .await
                }
                TransportState::TcpEdns | TransportState::TcpPlain => {
                    self.tcp_pool
                        .send(
                            packet.to_vec(),
                            key.destination,
                            Duration::from_secs(self.config.serviced_tcp_timeout_s),
                        )
                        .await
                }
            };

            match send_result {
                Ok(reply) => {
                    let header = match reso_outbound_wire::parse_reply_header(&reply) {
                        Ok(h) => h,
                        Err(_) => match state {
                            // Unparseable UDP replies are dropped silently
                            // (amplification defence, §7) — just retry.
                            TransportState::UdpEdns | TransportState::UdpPlain => continue,
                            // On TCP an unparseable reply faults the slot.
                            TransportState::TcpEdns | TransportState::TcpPlain => {
                                break Err(OutboundError::Protocol("malformed tcp reply".into()));
                            }
                        },
                    };

                    const FORMERR: u16 = 1;
                    if header.rcode == FORMERR {
                        match state {
                            TransportState::UdpEdns => {
                                state = TransportState::UdpPlain;
                                continue;
                            }
                            TransportState::TcpEdns => {
                                state = TransportState::TcpPlain;
                                continue;
                            }
                            // Already plain: no further fallback is
                            // defined, deliver as the terminal reply.
                            TransportState::UdpPlain | TransportState::TcpPlain => break Ok(reply),
                        }
                    }

                    if header.flags.tc {
                        match state {
                            TransportState::UdpEdns => {
                                state = TransportState::TcpEdns;
                                continue;
                            }
                            TransportState::UdpPlain => {
                                state = TransportState::TcpPlain;
                                continue;
                            }
                            // TC set over TCP shouldn't happen; deliver it
                            // rather than loop forever.
                            TransportState::TcpEdns | TransportState::TcpPlain => break Ok(reply),
                        }
                    }

                    break Ok(reply);
                }
                Err(OutboundError::Timeout) => match state {
                    TransportState::UdpEdns | TransportState::UdpPlain => {
                        udp_retries += 1;
                        if udp_retries >= self.config.udp_retry_budget {
                            state = match state {
                                TransportState::UdpEdns => TransportState::TcpEdns,
                                _ => TransportState::TcpPlain,
                            };
                            udp_retries = 0;
                        }
                        continue;
                    }
                    // No transition is defined out of a TCP timeout; it is
                    // delivered as the terminal outcome.
                    TransportState::TcpEdns | TransportState::TcpPlain => break Err(OutboundError::Timeout),
                },
                Err(e) => break Err(e),
            }
        };

        self.finish(&key, &entry, outcome).await;
    }

    /// Terminal fan-out (§4.4): snapshot the subscriber list, remove the
    /// entry from the index before dispatching (so a re-entrant
    /// submission during a callback creates a fresh entry rather than
    /// attaching to a corpse), then deliver to each subscriber in order.
    async fn finish(
        &self,
        key: &ServicedKey,
        entry: &Arc<Mutex<EntryState>>,
        outcome: Result<Bytes, OutboundError>,
    ) {
        let subscribers = {
            let mut guard = entry.lock();
            std::mem::take(&mut guard.subscribers)
        };
        self.map.remove(key);
        self.memory
            .sub(key.qname.len() + subscribers.len() * SUBSCRIBER_OVERHEAD);

        for subscriber in subscribers {
            let _ = subscriber.tx.send(outcome.clone());
        }
    }
}

/// Build the question section (qname + qtype + qclass). `qname` is
/// accepted pre-encoded from the caller (§4.7).
fn build_question(qname: &[u8], qtype: u16, qclass: u16) -> anyhow::Result<Bytes> {
    let mut writer = WireWriter::with_capacity(qname.len() + 4);
    writer.write_bytes(qname)?;
    writer.write_u16(qtype);
    writer.write_u16(qclass);
    Ok(writer.into_bytes())
}

fn build_packet(flags: DnsFlags, question: &[u8], edns: Option<Edns>) -> anyhow::Result<Bytes> {
    let header = DnsHeader {
        id: 0,
        flags,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: if edns.is_some() { 1 } else { 0 },
    };
    let mut writer = WireWriter::with_capacity(DnsHeader::WIRE_LEN + question.len() + 32);
    header.encode(&mut writer);
    writer.write_bytes(question)?;
    if let Some(edns) = edns {
        edns.encode(&mut writer);
    }
    Ok(writer.into_bytes())
}

/// Caller-facing handle to one subscription on a serviced query.
pub struct ServicedHandle {
    index: Arc<ServicedIndex>,
    key: ServicedKey,
    entry: Arc<Mutex<EntryState>>,
    id: u64,
    rx: oneshot::Receiver<Result<Bytes, OutboundError>>,
}

impl ServicedHandle {
    /// Wait for the terminal outcome. Resolves exactly once (I5) unless
    /// [`Self::stop`] was called first, in which case this never resolves
    /// (the sender was dropped without sending, so this returns
    /// `Cancelled` instead of hanging forever).
    pub async fn wait(self) -> Result<Bytes, OutboundError> {
        self.rx.await.unwrap_or(Err(OutboundError::Cancelled))
    }

    /// Detach this subscriber. If it was the last one, the underlying
    /// child request is cancelled and the entry destroyed (§5). Legal to
    /// call from within one's own terminal callback.
    pub fn stop(&self) {
        let (now_empty, driver) = {
            let mut guard = self.entry.lock();
            let Some(pos) = guard.subscribers.iter().position(|s| s.id == self.id) else {
                return;
            };
            guard.subscribers.remove(pos);
            let now_empty = guard.subscribers.is_empty();
            let driver = if now_empty { guard.driver.take() } else { None };
            (now_empty, driver)
        };

        if now_empty {
            self.index.map.remove(&self.key);
            if let Some(abort) = driver {
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "serviced_tests.rs"]
mod serviced_tests;
