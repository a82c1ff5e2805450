//! End-to-end scenarios across the MUX, the participant core and the node

use async_trait::async_trait;
use iso_mux::{Channel, IsoMsg, MemoryChannel};
use std::sync::Arc;
use std::time::Duration;
use switch_node::factory::ParticipantDescriptor;
use switch_node::query_host::NO_RESPONSE;
use switch_node::{build_participant, NodeConfig, ParticipantDeps, SwitchNode};
use tokio::sync::Mutex;
use tokio::time::Instant;
use txn_core::{Context, Join, Participant, ResultFlags, TxnStatus, WorkerPool};

fn request(stan: &str) -> IsoMsg {
    IsoMsg::with_mti("0200")
        .with_field(2, "4111111111111111")
        .with_field(4, "000000001000")
        .with_field(11, stan)
        .with_field(41, "TERM0001")
}

fn query_host(timeout_ms: u64) -> ParticipantDescriptor {
    ParticipantDescriptor::QueryHost {
        request_key: "REQUEST".to_string(),
        response_key: "RESPONSE".to_string(),
        timeout_ms,
        continuations: true,
    }
}

fn node_with(participants: Vec<ParticipantDescriptor>) -> (SwitchNode, Arc<MemoryChannel>) {
    let config = NodeConfig {
        participants,
        ..Default::default()
    };
    let (local, remote) = MemoryChannel::pair("e2e");
    let node = SwitchNode::build(config, Arc::new(local)).unwrap();
    (node, Arc::new(remote))
}

/// Host answering each request `copies` times after `delay`
fn spawn_host(remote: Arc<MemoryChannel>, delay: Duration, copies: usize) {
    tokio::spawn(async move {
        while let Ok(req) = remote.receive().await {
            let remote = remote.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut rsp = req.clone();
                rsp.set_response_mti();
                rsp.set(39, "00");
                for _ in 0..copies {
                    let _ = remote.send(rsp.clone()).await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            });
        }
    });
}

struct Recorder {
    name: String,
    rc: ResultFlags,
    calls: Mutex<Vec<&'static str>>,
}

impl Recorder {
    fn new(name: &str, rc: ResultFlags) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            rc,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Participant for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _id: u64, _ctx: &Arc<Context>) -> ResultFlags {
        self.calls.lock().await.push("prepare");
        self.rc
    }

    async fn commit(&self, _id: u64, _ctx: &Arc<Context>) {
        self.calls.lock().await.push("commit");
    }

    async fn abort(&self, _id: u64, _ctx: &Arc<Context>) {
        self.calls.lock().await.push("abort");
    }
}

#[tokio::test]
async fn scenario_1_join_all_prepared_readonly() {
    let deps = ParticipantDeps {
        mux: None,
        pool: WorkerPool::new(4).unwrap(),
    };
    let descriptor = ParticipantDescriptor::Join {
        name: Some("risk".to_string()),
        participants: ["velocity", "fraud", "limits"]
            .iter()
            .map(|name| ParticipantDescriptor::Script {
                name: name.to_string(),
            })
            .collect(),
    };
    let join = build_participant(&descriptor, &deps).unwrap();
    assert_eq!(join.name(), "risk");
    let ctx = Arc::new(Context::new(1));

    assert_eq!(join.prepare(1, &ctx).await, ResultFlags::PREPARED.readonly());
}

#[tokio::test]
async fn scenario_2_join_one_aborted() {
    let children = vec![
        Recorder::new("a", ResultFlags::PREPARED),
        Recorder::new("b", ResultFlags::ABORTED),
        Recorder::new("c", ResultFlags::PREPARED),
    ];
    let join = Join::new(
        "checks",
        children
            .iter()
            .map(|c| c.clone() as Arc<dyn Participant>)
            .collect(),
        WorkerPool::new(4).unwrap(),
    )
    .unwrap();
    let ctx = Arc::new(Context::new(2));

    assert_eq!(join.prepare(2, &ctx).await, ResultFlags::ABORTED);
    join.abort(2, &ctx).await;

    for child in &children {
        assert_eq!(*child.calls.lock().await, vec!["prepare", "abort"]);
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_3_host_never_answers() {
    let (node, _remote) = node_with(vec![query_host(500)]);

    let start = Instant::now();
    let auth = node.authorize(request("000003")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(auth.outcome.status, TxnStatus::Aborted);
    assert!(auth.response.is_none());
    assert_eq!(auth.result.failure().unwrap().code, NO_RESPONSE);
    assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(550));
    assert_eq!(node.mux().pending_count(), 0);
    assert_eq!(node.mux().metrics().rx_expired.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_4_answer_then_duplicate() {
    let (node, remote) = node_with(vec![query_host(500)]);
    assert!(node.mux().take_unhandled().is_none());
    spawn_host(remote, Duration::from_millis(100), 2);

    let start = Instant::now();
    let auth = node.authorize(request("000004")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(auth.outcome.status, TxnStatus::Committed);
    assert_eq!(auth.response.unwrap().get(39), Some("00"));
    assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.mux().metrics().rx_unhandled.get(), 1);
    assert_eq!(node.unhandled_seen(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_5_pause_resumes_after_timeout() {
    let (node, _remote) = node_with(vec![
        ParticipantDescriptor::Pause {
            name: Some("cool-off".to_string()),
            timeout_ms: 200,
        },
        ParticipantDescriptor::CheckField {
            field: 11,
            request_key: "REQUEST".to_string(),
        },
    ]);

    let start = Instant::now();
    let auth = node.authorize(request("000005")).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(auth.outcome.status, TxnStatus::Committed);
    assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250));
    assert_eq!(node.manager().metrics().paused.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsolicited_network_message_is_drained() {
    let (node, remote) = node_with(vec![query_host(500)]);

    let echo = IsoMsg::with_mti("0800")
        .with_field(11, "000100")
        .with_field(70, "301");
    remote.send(echo).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.unhandled_seen(), 1);
    assert_eq!(node.mux().metrics().rx_unhandled.get(), 1);
    assert_eq!(node.mux().pending_count(), 0);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn join_with_waiting_host_is_rejected() {
    let config = NodeConfig {
        participants: vec![ParticipantDescriptor::Join {
            name: None,
            participants: vec![
                query_host(500),
                ParticipantDescriptor::Script {
                    name: "fraud".to_string(),
                },
            ],
        }],
        ..Default::default()
    };
    let (local, _remote) = MemoryChannel::pair("e2e");

    let built = SwitchNode::build(config, Arc::new(local));
    assert!(matches!(built, Err(switch_node::Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn default_assembly_authorizes() {
    let (node, remote) = node_with(NodeConfig::default().participants);
    spawn_host(remote, Duration::from_millis(20), 1);

    let auth = node.authorize(request("000006")).await.unwrap();
    assert_eq!(auth.outcome.status, TxnStatus::Committed);
    assert!(!auth.result.is_failed());

    let rejected = node
        .authorize(IsoMsg::with_mti("0200").with_field(11, "000007"))
        .await
        .unwrap();
    assert_eq!(rejected.outcome.status, TxnStatus::Aborted);
    assert!(rejected.response.is_none());

    node.shutdown().await.unwrap();
}
