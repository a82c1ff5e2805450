//! Participant that forwards the request to the remote host
//!
//! The request `IsoMsg` is read from the context, sent through the MUX and
//! the host's answer stored back in the context.
//!
//! In continuation mode the transaction pauses while the request is in
//! flight: the context itself is the handback, and whichever of
//! `response_received` / `expired` the MUX calls resumes it. Blocking mode
//! holds the driver's worker until the MUX completes the request.

use async_trait::async_trait;
use iso_mux::{Handback, IsoMsg, Mux, ResponseListener};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use txn_core::{Context, Participant, ResultFlags};

/// Returned while the request is in flight
pub const IN_FLIGHT: ResultFlags = ResultFlags::PREPARED.pause().readonly().no_join();

/// The host answered
pub const ANSWERED: ResultFlags = ResultFlags::PREPARED.readonly().no_join();

/// No answer, or the request could not be sent
pub const UNANSWERED: ResultFlags = ResultFlags::ABORTED.readonly().no_join();

/// Result code recorded when the host is unreachable
pub const HOST_UNREACHABLE: &str = "HOST_UNREACHABLE";

/// Result code recorded when the host did not answer in time
pub const NO_RESPONSE: &str = "NO_RESPONSE";

/// Result code recorded when the context carries no request
pub const MISSING_REQUEST: &str = "MISSING_REQUEST";

/// Completes paused transactions from MUX callbacks
struct Resumer {
    response_key: String,
}

impl ResponseListener for Resumer {
    fn response_received(&self, response: IsoMsg, handback: Handback) {
        let Ok(ctx) = handback.downcast::<Arc<Context>>() else {
            warn!("Handback is not a transaction context");
            return;
        };
        debug!(id = ctx.id(), "Host answered");
        ctx.put(self.response_key.clone(), response);
        ctx.resume(ANSWERED);
    }

    fn expired(&self, handback: Handback) {
        let Ok(ctx) = handback.downcast::<Arc<Context>>() else {
            warn!("Handback is not a transaction context");
            return;
        };
        debug!(id = ctx.id(), "Host did not answer");
        ctx.fail(NO_RESPONSE, "no response from host");
        ctx.resume(UNANSWERED);
    }
}

/// Forwards the request held in the context to the host
pub struct QueryHost {
    name: String,
    mux: Mux,
    request_key: String,
    timeout: Duration,
    continuations: bool,
    resumer: Arc<Resumer>,
}

impl QueryHost {
    /// Create a participant reading `request_key` and writing `response_key`
    pub fn new(
        mux: Mux,
        request_key: impl Into<String>,
        response_key: impl Into<String>,
        timeout: Duration,
        continuations: bool,
    ) -> Self {
        Self {
            name: "query-host".to_string(),
            mux,
            request_key: request_key.into(),
            timeout,
            continuations,
            resumer: Arc::new(Resumer {
                response_key: response_key.into(),
            }),
        }
    }

    fn unreachable(&self, ctx: &Context, detail: String) -> ResultFlags {
        warn!(id = ctx.id(), participant = %self.name, "{}", detail);
        ctx.fail(HOST_UNREACHABLE, &detail);
        UNANSWERED
    }
}

#[async_trait]
impl Participant for QueryHost {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, id: u64, ctx: &Arc<Context>) -> ResultFlags {
        let Some(request) = ctx.get::<IsoMsg>(&self.request_key) else {
            ctx.fail(MISSING_REQUEST, &format!("no request under '{}'", self.request_key));
            return UNANSWERED;
        };
        if !self.mux.is_connected() {
            return self.unreachable(ctx, "MUX is not connected".to_string());
        }
        let request = IsoMsg::clone(&request);

        if self.continuations {
            let handback: Handback = Box::new(ctx.clone());
            let listener: Arc<dyn ResponseListener> = self.resumer.clone();
            match self
                .mux
                .request_with_listener(request, self.timeout, listener, handback)
                .await
            {
                Ok(()) => {
                    debug!(id, "Request in flight, pausing");
                    IN_FLIGHT
                }
                Err(e) => self.unreachable(ctx, e.to_string()),
            }
        } else {
            match self.mux.request(request, self.timeout).await {
                Ok(Some(response)) => {
                    ctx.put(self.resumer.response_key.clone(), response);
                    ANSWERED
                }
                Ok(None) => {
                    ctx.fail(NO_RESPONSE, "no response from host");
                    UNANSWERED
                }
                Err(e) => self.unreachable(ctx, e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_mux::{Channel, MemoryChannel, MuxConfig};
    use tokio::time::Instant;

    fn request() -> IsoMsg {
        IsoMsg::with_mti("0200")
            .with_field(11, "000042")
            .with_field(41, "TERM0001")
    }

    fn setup() -> (Mux, Arc<MemoryChannel>) {
        let (local, remote) = MemoryChannel::pair("query-host");
        let mux = Mux::new(Arc::new(local), MuxConfig::default()).unwrap();
        mux.spawn_receiver().unwrap();
        (mux, Arc::new(remote))
    }

    fn answer_after(remote: Arc<MemoryChannel>, delay: Duration) {
        tokio::spawn(async move {
            while let Ok(req) = remote.receive().await {
                tokio::time::sleep(delay).await;
                let mut rsp = req.clone();
                rsp.set_response_mti();
                rsp.set(39, "00");
                let _ = remote.send(rsp).await;
            }
        });
    }

    fn context_with_request() -> Arc<Context> {
        let ctx = Arc::new(Context::new(1));
        ctx.put("REQUEST", request());
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuation_resumes_on_response() {
        let (mux, remote) = setup();
        answer_after(remote, Duration::from_millis(100));
        let host = QueryHost::new(mux, "REQUEST", "RESPONSE", Duration::from_millis(500), true);
        let ctx = context_with_request();

        let start = Instant::now();
        assert_eq!(host.prepare(1, &ctx).await, IN_FLIGHT);
        assert_eq!(ctx.pause().resumed().await, Some(ANSWERED));
        assert!(start.elapsed() < Duration::from_millis(150));

        let rsp = ctx.get::<IsoMsg>("RESPONSE").unwrap();
        assert_eq!(rsp.get(39), Some("00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuation_expires() {
        let (mux, _remote) = setup();
        let host = QueryHost::new(mux.clone(), "REQUEST", "RESPONSE", Duration::from_millis(500), true);
        let ctx = context_with_request();

        let start = Instant::now();
        assert_eq!(host.prepare(1, &ctx).await, IN_FLIGHT);
        assert_eq!(ctx.pause().resumed().await, Some(UNANSWERED));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(ctx.result().failure().unwrap().code, NO_RESPONSE);
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_mode() {
        let (mux, remote) = setup();
        answer_after(remote, Duration::from_millis(50));
        let host = QueryHost::new(mux, "REQUEST", "RESPONSE", Duration::from_millis(500), false);
        let ctx = context_with_request();

        assert_eq!(host.prepare(1, &ctx).await, ANSWERED);
        assert!(ctx.contains("RESPONSE"));
    }

    #[tokio::test]
    async fn test_missing_request() {
        let (mux, _remote) = setup();
        let host = QueryHost::new(mux, "REQUEST", "RESPONSE", Duration::from_millis(500), true);
        let ctx = Arc::new(Context::new(1));

        assert_eq!(host.prepare(1, &ctx).await, UNANSWERED);
        assert_eq!(ctx.result().failure().unwrap().code, MISSING_REQUEST);
    }

    #[tokio::test]
    async fn test_disconnected_mux() {
        let (local, _remote) = MemoryChannel::pair("query-host");
        local.disconnect().await.unwrap();
        let mux = Mux::new(Arc::new(local), MuxConfig::default()).unwrap();
        let host = QueryHost::new(mux, "REQUEST", "RESPONSE", Duration::from_millis(500), true);
        let ctx = context_with_request();

        assert_eq!(host.prepare(1, &ctx).await, UNANSWERED);
        assert_eq!(ctx.result().failure().unwrap().code, HOST_UNREACHABLE);
    }
}
