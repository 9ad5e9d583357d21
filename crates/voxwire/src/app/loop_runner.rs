use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mesh::{MeshBuilder, WireMesh};
use crate::net::{FrameTransport, LinkState, TransportConfig, TransportError};
use crate::protocol::{ActionDispatcher, ActionRequest, MetadataSink};
use crate::world::{Authority, BlockRegistry, EntityManager, SceneBridge, WireGraph};

use super::metrics::{MetricsAccumulator, MetricsHandle};

pub const DEFAULT_MAX_FRAMES_PER_TICK: usize = 50;
pub const DEFAULT_TARGET_TPS: u32 = 20;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frames_per_tick: usize,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    pub authority: Authority,
    pub transport: TransportConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: DEFAULT_TARGET_TPS,
            max_frames_per_tick: DEFAULT_MAX_FRAMES_PER_TICK,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            authority: Authority::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("link closed: {reason}")]
    LinkClosed { reason: String },
}

/// Where a tick reads frames from and writes responses to.
pub trait FrameLink {
    fn poll_frames(&mut self, max_frames: usize, out: &mut Vec<String>) -> usize;

    fn send(&mut self, frame: &str);

    fn flush(&mut self);

    /// Typed outbound path for local callers: encodes `request` and queues it.
    fn send_request(&mut self, request: &ActionRequest) -> Result<(), serde_json::Error> {
        let frame = request.to_frame()?;
        self.send(&frame);
        Ok(())
    }
}

impl FrameLink for FrameTransport {
    fn poll_frames(&mut self, max_frames: usize, out: &mut Vec<String>) -> usize {
        FrameTransport::poll_frames(self, max_frames, out)
    }

    fn send(&mut self, frame: &str) {
        FrameTransport::send(self, frame);
    }

    fn flush(&mut self) {
        FrameTransport::flush(self);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frames: usize,
    pub responses: usize,
    pub announced: usize,
    pub rebuilt: bool,
}

/// One tick: drain a bounded batch of frames, apply them in arrival order, answer each
/// item, then rebuild the wire mesh once if anything marked the graph dirty.
///
/// In authoritative mode the accepted places are sent back as one `place` envelope
/// carrying the assigned ids, after the responses.
pub struct TickRunner {
    world: EntityManager,
    dispatcher: ActionDispatcher,
    mesh: MeshBuilder,
    max_frames_per_tick: usize,
    inbox: Vec<String>,
}

impl TickRunner {
    pub fn new(
        world: EntityManager,
        dispatcher: ActionDispatcher,
        max_frames_per_tick: usize,
    ) -> Self {
        Self {
            world,
            dispatcher,
            mesh: MeshBuilder::new(),
            max_frames_per_tick: max_frames_per_tick.max(1),
            inbox: Vec::new(),
        }
    }

    pub fn tick(&mut self, link: &mut dyn FrameLink) -> TickReport {
        self.inbox.clear();
        let frames = link.poll_frames(self.max_frames_per_tick, &mut self.inbox);

        let mut responses = 0usize;
        for frame in self.inbox.drain(..) {
            for response in self.dispatcher.dispatch(&frame, &mut self.world) {
                match response.to_frame() {
                    Ok(encoded) => {
                        link.send(&encoded);
                        responses += 1;
                    }
                    Err(err) => warn!(error = %err, "response_encode_failed"),
                }
            }
        }

        let assigned = self.world.take_assigned_placements();
        let mut announced = 0usize;
        if !assigned.is_empty() {
            let count = assigned.len();
            match link.send_request(&ActionRequest::Place(assigned)) {
                Ok(()) => announced = count,
                Err(err) => warn!(error = %err, count, "assigned_ids_encode_failed"),
            }
        }

        let rebuilt = match self.mesh.rebuild_if_dirty(self.world.wires_mut()) {
            Some(mesh) => {
                self.world.bridge_mut().upload_wire_mesh(mesh);
                true
            }
            None => false,
        };
        link.flush();

        if frames > 0 {
            debug!(frames, responses, announced, rebuilt, "tick_drained");
        }
        TickReport {
            frames,
            responses,
            announced,
            rebuilt,
        }
    }

    pub fn world(&self) -> &EntityManager {
        &self.world
    }

    pub fn mesh(&self) -> &WireMesh {
        self.mesh.mesh()
    }

    pub fn rebuild_count(&self) -> u64 {
        self.mesh.rebuild_count()
    }
}

pub fn run_peer(
    config: LoopConfig,
    bridge: Box<dyn SceneBridge>,
    metadata: Box<dyn MetadataSink>,
) -> Result<(), AppError> {
    run_peer_with_metrics(config, bridge, metadata, MetricsHandle::default())
}

/// Connects and ticks until the link closes. A closed link is reported as an error.
pub fn run_peer_with_metrics(
    config: LoopConfig,
    bridge: Box<dyn SceneBridge>,
    metadata: Box<dyn MetadataSink>,
    metrics_handle: MetricsHandle,
) -> Result<(), AppError> {
    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(1));
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);

    info!(
        target_tps,
        max_frames_per_tick = config.max_frames_per_tick,
        max_ticks_per_frame,
        authority = ?config.authority,
        primary = %config.transport.primary,
        fallback = ?config.transport.fallback.as_ref().map(ToString::to_string),
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        "loop_config"
    );

    let world = EntityManager::new(
        config.authority,
        BlockRegistry::standard(),
        WireGraph::new(),
        bridge,
    );
    let mut runner = TickRunner::new(
        world,
        ActionDispatcher::new(metadata),
        config.max_frames_per_tick,
    );
    let mut transport = FrameTransport::connect(config.transport)?;

    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut metrics_accumulator = MetricsAccumulator::new(metrics_log_interval);

    loop {
        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
        last_frame_instant = now;
        accumulator = accumulator.saturating_add(clamp_frame_delta(raw_frame_dt, max_frame_delta));

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        accumulator = step_plan.remaining_accumulator;
        if !step_plan.dropped_backlog.is_zero() {
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "tick_clamp_triggered"
            );
        }

        for _ in 0..step_plan.ticks_to_run {
            let report = runner.tick(&mut transport);
            metrics_accumulator.record_tick(report.frames, report.rebuilt);
        }

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(now, transport.backlog()) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                frames_per_sec = snapshot.frames_per_sec,
                rebuilds_per_sec = snapshot.rebuilds_per_sec,
                backlog = snapshot.backlog,
                entity_count = runner.world().entity_count(),
                wire_count = runner.world().wires().len(),
                "loop_metrics"
            );
        }

        if transport.state() == LinkState::Closed {
            let reason = transport
                .close_reason()
                .unwrap_or("closed")
                .to_string();
            info!(
                entity_count = runner.world().entity_count(),
                rebuilds = runner.rebuild_count(),
                "peer_stopped"
            );
            return Err(AppError::LinkClosed { reason });
        }

        thread::sleep(fixed_dt.saturating_sub(accumulator));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use serde_json::{json, Value};

    use super::*;
    use crate::protocol::{RemoveItem, Response};
    use crate::world::{Entity, EntityId, GridPos};

    #[derive(Default)]
    struct MemoryLink {
        inbound: VecDeque<String>,
        sent: Vec<String>,
        flushes: usize,
    }

    impl MemoryLink {
        fn with_frames<I: IntoIterator<Item = String>>(frames: I) -> Self {
            Self {
                inbound: frames.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl FrameLink for MemoryLink {
        fn poll_frames(&mut self, max_frames: usize, out: &mut Vec<String>) -> usize {
            let mut taken = 0;
            while taken < max_frames {
                let Some(frame) = self.inbound.pop_front() else {
                    break;
                };
                out.push(frame);
                taken += 1;
            }
            taken
        }

        fn send(&mut self, frame: &str) {
            self.sent.push(frame.to_string());
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    #[derive(Default)]
    struct UploadCounter {
        uploads: usize,
        last_vertex_count: usize,
    }

    struct CountingBridge(Rc<RefCell<UploadCounter>>);

    impl SceneBridge for CountingBridge {
        fn materialize(&mut self, _entity: &Entity) -> Result<(), String> {
            Ok(())
        }

        fn refresh(&mut self, _entity: &Entity) {}

        fn release(&mut self, _id: EntityId) {}

        fn upload_wire_mesh(&mut self, mesh: &WireMesh) {
            let mut counter = self.0.borrow_mut();
            counter.uploads += 1;
            counter.last_vertex_count = mesh.vertex_count();
        }
    }

    fn runner(max_frames_per_tick: usize) -> (TickRunner, Rc<RefCell<UploadCounter>>) {
        runner_with_authority(Authority::Predictive, max_frames_per_tick)
    }

    fn runner_with_authority(
        authority: Authority,
        max_frames_per_tick: usize,
    ) -> (TickRunner, Rc<RefCell<UploadCounter>>) {
        let counter = Rc::new(RefCell::new(UploadCounter::default()));
        let world = EntityManager::new(
            authority,
            BlockRegistry::standard(),
            WireGraph::new(),
            Box::new(CountingBridge(Rc::clone(&counter))),
        );
        (
            TickRunner::new(world, ActionDispatcher::default(), max_frames_per_tick),
            counter,
        )
    }

    fn place_wire_frame(id: u64, x: i32) -> String {
        json!({
            "action": "place",
            "data": [{ "id": id, "blockType": "wire", "position": [x, 0, 0] }]
        })
        .to_string()
    }

    #[test]
    fn many_wire_mutations_in_one_tick_rebuild_once() {
        let (mut runner, counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames((1..=20).map(|id| place_wire_frame(id, id as i32)));

        let report = runner.tick(&mut link);

        assert_eq!(report.frames, 20);
        assert!(report.rebuilt);
        assert_eq!(runner.rebuild_count(), 1);
        assert_eq!(counter.borrow().uploads, 1);
        assert_eq!(counter.borrow().last_vertex_count, runner.mesh().vertex_count());
        assert_eq!(runner.world().wires().len(), 20);
    }

    #[test]
    fn quiet_tick_does_not_rebuild() {
        let (mut runner, counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames([place_wire_frame(1, 0)]);
        runner.tick(&mut link);

        let report = runner.tick(&mut link);

        assert_eq!(report, TickReport::default());
        assert_eq!(counter.borrow().uploads, 1);
        assert_eq!(link.flushes, 2);
    }

    #[test]
    fn frames_over_the_cap_carry_to_next_tick() {
        let (mut runner, _counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames((1..=60).map(|id| place_wire_frame(id, id as i32)));

        let first = runner.tick(&mut link);
        assert_eq!(first.frames, 50);
        assert_eq!(link.inbound.len(), 10);
        assert_eq!(runner.world().wires().len(), 50);

        let second = runner.tick(&mut link);
        assert_eq!(second.frames, 10);
        assert!(link.inbound.is_empty());
        assert_eq!(runner.world().wires().len(), 60);
        assert!(runner.world().contains(EntityId(60)));
    }

    #[test]
    fn responses_are_sent_in_item_order() {
        let (mut runner, _counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let frame = json!({
            "action": "place",
            "data": [
                { "id": 1, "blockType": "block", "position": [0, 0, 0] },
                { "id": 2, "blockType": "unknown", "position": [1, 0, 0] }
            ]
        })
        .to_string();
        let mut link = MemoryLink::with_frames([frame, r#"{"action":"dance"}"#.to_string()]);

        let report = runner.tick(&mut link);

        assert_eq!(report.responses, 3);
        let decoded: Vec<Response> = link
            .sent
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("response frame"))
            .collect();
        assert!(decoded[0].ok);
        assert!(!decoded[1].ok);
        assert_eq!(decoded[2], Response::invalid_action());
    }

    #[test]
    fn players_and_peer_responses_produce_no_outbound_frames() {
        let (mut runner, _counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames([
            r#"{"action":"players","data":[]}"#.to_string(),
            r#"{"ok":true,"message":"placed block 3"}"#.to_string(),
        ]);

        let report = runner.tick(&mut link);

        assert_eq!(report.frames, 2);
        assert!(link.sent.is_empty());
    }

    #[test]
    fn wire_update_in_tick_moves_mesh() {
        let (mut runner, counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames([place_wire_frame(7, 0)]);
        runner.tick(&mut link);
        let before: Vec<[f32; 3]> = runner.mesh().positions.clone();

        link.inbound.push_back(
            json!({ "action": "update", "data": [{ "id": 7, "position": [0, 4, 0] }] })
                .to_string(),
        );
        runner.tick(&mut link);

        assert_eq!(counter.borrow().uploads, 2);
        assert_ne!(runner.mesh().positions, before);
        assert_eq!(
            runner.world().wires().segment_at(GridPos::new(0, 4, 0)).map(|segment| segment.id),
            Some(EntityId(7))
        );
        let last: Value = serde_json::from_str(link.sent.last().expect("response")).expect("json");
        assert_eq!(last["message"], "updated 7");
    }

    #[test]
    fn authoritative_tick_announces_assigned_ids_after_responses() {
        let (mut runner, _counter) =
            runner_with_authority(Authority::Authoritative, DEFAULT_MAX_FRAMES_PER_TICK);
        let frame = json!({
            "action": "place",
            "data": [
                { "id": 77, "blockType": "block", "position": [0, 0, 0] },
                { "id": 78, "blockType": "wire", "position": [1, 0, 0] },
                { "id": 79, "blockType": "unknown", "position": [2, 0, 0] }
            ]
        })
        .to_string();
        let mut link = MemoryLink::with_frames([frame]);

        let report = runner.tick(&mut link);

        assert_eq!(report.responses, 3);
        assert_eq!(report.announced, 2);
        assert_eq!(link.sent.len(), 4);
        let announcement: Value = serde_json::from_str(&link.sent[3]).expect("json");
        assert_eq!(
            announcement,
            json!({
                "action": "place",
                "data": [
                    { "id": 1, "blockType": "block", "position": [0, 0, 0], "rotation": "FORWARD" },
                    { "id": 2, "blockType": "wire", "position": [1, 0, 0], "rotation": "FORWARD" }
                ]
            })
        );

        link.inbound
            .push_back(json!({ "action": "remove", "data": [{ "id": 1 }] }).to_string());
        let report = runner.tick(&mut link);
        assert_eq!(report.announced, 0);
        let last: Value = serde_json::from_str(link.sent.last().expect("response")).expect("json");
        assert_eq!(last["message"], "removed 1");
        assert_eq!(runner.world().entity_count(), 0);
    }

    #[test]
    fn predictive_tick_sends_no_announcement() {
        let (mut runner, _counter) = runner(DEFAULT_MAX_FRAMES_PER_TICK);
        let mut link = MemoryLink::with_frames([place_wire_frame(3, 0)]);

        let report = runner.tick(&mut link);

        assert_eq!(report.announced, 0);
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn send_request_encodes_typed_envelope() {
        let mut link = MemoryLink::default();
        link.send_request(&ActionRequest::Remove(vec![RemoveItem { id: EntityId(4) }]))
            .expect("encode");

        assert_eq!(link.sent, vec![r#"{"action":"remove","data":[{"id":4}]}"#.to_string()]);
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let fixed_dt = Duration::from_millis(50);
        let result = plan_sim_steps(Duration::from_millis(120), fixed_dt, 5);

        assert_eq!(result.ticks_to_run, 2);
        assert_eq!(result.remaining_accumulator, Duration::from_millis(20));
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let fixed_dt = Duration::from_millis(50);
        let result = plan_sim_steps(Duration::from_millis(400), fixed_dt, 3);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(250));
    }

    #[test]
    fn zero_interval_falls_back() {
        assert_eq!(
            normalize_non_zero_duration(Duration::ZERO, Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
