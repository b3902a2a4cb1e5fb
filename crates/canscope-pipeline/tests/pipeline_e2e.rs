//! End-to-end tests for the frame pipeline
//!
//! Frames are injected into in-process virtual buses, so no CAN hardware or
//! vcan interface is needed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canscope_bus::{VirtualConfig, VirtualSource};
use canscope_core::{Direction, Frame, FrameSource, NullCodec, PipelineEvent, SignalCodec};
use canscope_pipeline::{
    lttb, read_trace, Consumer, FilterAction, FilterRule, Pipeline, PipelineConfig, PlayerConfig,
    RecorderConfig, RxFilter, SignalKey, TraceFormat, TracePlayer, TraceRecorder, TxRow,
};
use canscope_signals::{MessageDefinition, SignalDatabase, SignalDefinition};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        live_interval_ms: 10,
        watch_interval_ms: 10,
        plot_interval_ms: 10,
        trace_flush_interval_ms: 10,
        trace_commit_interval_ms: 20,
        tx_counter_interval_ms: 20,
        tx_snapshot_interval_ms: 20,
        ..Default::default()
    }
}

/// EngineData (0x100): EngineSpeed u16 LE × 0.25 rpm, CoolantTemp u8 − 40 °C
fn engine_database() -> Arc<SignalDatabase> {
    let db = SignalDatabase::new();
    db.register(
        MessageDefinition::new(0x100, "EngineData", 8)
            .with_cycle_time(100)
            .with_signal(
                SignalDefinition::unsigned("EngineSpeed", 0, 16)
                    .scaled(0.25, 0.0)
                    .with_unit("rpm"),
            )
            .with_signal(
                SignalDefinition::unsigned("CoolantTemp", 16, 8)
                    .scaled(1.0, -40.0)
                    .with_unit("°C"),
            ),
    );
    Arc::new(db)
}

fn connect_isolated(pipeline: &Pipeline, bus: u8) -> Arc<VirtualSource> {
    let source = Arc::new(VirtualSource::isolated(bus));
    let index = pipeline.connections().add_source("virtual", source.clone());
    assert!(pipeline.connections().connect(index));
    source
}

async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<PipelineEvent>, mut pick: F) -> Option<PipelineEvent>
where
    F: FnMut(&PipelineEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pick(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3), wait)
        .await
        .ok()
        .flatten()
}

// =============================================================================
// Live table
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_three_frames_make_one_row() {
    let pipeline = Pipeline::new(fast_config(), Arc::new(NullCodec));
    let source = connect_isolated(&pipeline, 1);
    pipeline.start().unwrap();

    for i in 0..3 {
        source.inject(Frame::new(0x100, vec![0x01, 0x02]).with_timestamp(10.0 + i as f64 * 0.1));
    }

    assert!(wait_until(|| pipeline.live().lock().row(0).map(|r| r.count) == Some(3)).await);
    {
        let live = pipeline.live().lock();
        assert_eq!(live.len(), 1);
        let row = live.row(0).unwrap();
        assert_eq!(row.id, 0x100);
        assert_eq!(row.data_hex(), "01 02");
        let cycle = row.cycle_time_ms.unwrap();
        assert!((cycle - 100.0).abs() < 1e-6, "cycle {}", cycle);
    }
    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_drops_from_live_table_only() {
    let mut filter = RxFilter::default();
    filter.insert_rule(0, FilterRule::new("no diag", FilterAction::Drop, 0x700, 0x7FF));
    let pipeline = Pipeline::with_filter(fast_config(), Arc::new(NullCodec), filter);
    let source = connect_isolated(&pipeline, 1);
    pipeline.trace().lock().start();
    pipeline.start().unwrap();

    source.inject(Frame::new(0x7E8, vec![0x02, 0x50, 0x01]));
    source.inject(Frame::new(0x123, vec![0xFF]));

    assert!(wait_until(|| pipeline.trace().lock().entries().len() == 2).await);
    assert!(wait_until(|| pipeline.live().lock().len() == 1).await);
    assert_eq!(pipeline.live().lock().row(0).unwrap().id, 0x123);
    pipeline.shutdown();
}

// =============================================================================
// Watch registry
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_reports_latest_value() {
    let pipeline = Pipeline::new(fast_config(), engine_database());
    let source = connect_isolated(&pipeline, 1);
    pipeline
        .watch()
        .lock()
        .add_watch(0x100, "EngineSpeed", "Speed", "", Direction::Rx);
    let mut events = pipeline.subscribe();
    pipeline.start().unwrap();

    // 3000 × 0.25 = 750 rpm
    source.inject(Frame::new(0x100, vec![0xB8, 0x0B, 0x84, 0, 0, 0, 0, 0]));

    let event = next_matching(&mut events, |e| matches!(e, PipelineEvent::WatchValuesChanged { .. })).await;
    assert_eq!(event, Some(PipelineEvent::WatchValuesChanged { rows: vec![0] }));
    {
        let watch = pipeline.watch().lock();
        assert_eq!(watch.entries()[0].value_with_unit(), "750.00 rpm");
    }
    pipeline.shutdown();
}

// =============================================================================
// Transmit
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cyclic_transmit_is_traced_as_tx() {
    let pipeline = Pipeline::new(fast_config(), Arc::new(NullCodec));
    let channel = format!("e2e-tx-{}", std::process::id());
    let source = Arc::new(VirtualSource::new(&VirtualConfig {
        channel,
        bus_number: 1,
        fd: false,
        receive_own: true,
    }));
    let index = pipeline.connections().add_source("virtual", source.clone());
    assert!(pipeline.connections().connect(index));

    pipeline
        .tx_table()
        .lock()
        .add_row(TxRow::new(0x321, vec![0xDE, 0xAD]).cyclic(20));
    pipeline.trace().lock().start();
    pipeline.start().unwrap();

    assert!(wait_until(|| pipeline.tx_table().lock().row(0).map(|r| r.count).unwrap_or(0) >= 3).await);
    assert!(
        wait_until(|| {
            pipeline
                .trace()
                .lock()
                .entries()
                .iter()
                .any(|e| e.id == 0x321 && e.direction == Direction::Tx)
        })
        .await
    );
    assert!(pipeline.live().lock().is_empty());
    assert!(source.sent().len() >= 3);

    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tx_snapshot_follows_edits_within_interval() {
    let config = PipelineConfig::default();
    let bound = config.tx_snapshot_interval() + Duration::from_millis(50);
    let pipeline = Pipeline::new(config, Arc::new(NullCodec));
    pipeline.start().unwrap();

    let mut worst = Duration::ZERO;
    for round in 0..3u32 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let table = pipeline.tx_table();
        table.lock().add_row(TxRow::new(0x100 + round, vec![0]));
        tokio::time::sleep(Duration::from_millis(2)).await;
        table.lock().add_row(TxRow::new(0x200 + round, vec![0]));
        let edited = std::time::Instant::now();

        loop {
            let caught_up = {
                let table = table.lock();
                table.snapshot().items.len() == table.len()
            };
            if caught_up || edited.elapsed() > Duration::from_secs(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        worst = worst.max(edited.elapsed());
    }
    assert!(worst < bound, "snapshot lagged edits by {:?}", worst);

    pipeline.shutdown();
}

// =============================================================================
// Receiver
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_received_frame_lost_at_disconnect() {
    let pipeline = Pipeline::new(fast_config(), Arc::new(NullCodec));
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();
    pipeline
        .dispatcher()
        .register(Arc::new(move |batch: Arc<[Frame]>| {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
        }));

    let source = Arc::new(VirtualSource::isolated(1));
    for i in 0..5000u32 {
        source.inject(Frame::new(i & 0x7FF, vec![0]).with_timestamp(1.0));
    }
    let index = pipeline.connections().add_source("virtual", source.clone());
    assert!(pipeline.connections().connect(index));
    assert!(wait_until(|| pipeline.connections().frame_count(index) > 0).await);
    pipeline.connections().disconnect(index);

    let received = 5000 - source.pending();
    assert_eq!(dispatched.load(Ordering::SeqCst), received);
    assert!(!source.is_connected());
}

// =============================================================================
// Trace files
// =============================================================================

#[test]
fn test_rotation_continues_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let folder: PathBuf = dir.path().join("traces");
    let mut recorder = TraceRecorder::new(
        RecorderConfig {
            buffer_capacity: 1000,
            max_file_size: 600,
            folder: Some(folder.clone()),
            format: TraceFormat::Trc,
        },
        Arc::new(NullCodec),
        canscope_core::EventBus::default(),
    );

    recorder.start();
    let first = recorder.current_file().unwrap().to_path_buf();
    for i in 0..40 {
        recorder.on_frames(&[Frame::new(0x100, vec![i as u8; 8]).with_timestamp(100.0 + i as f64 * 0.01)]);
    }
    recorder.flush();
    recorder.stop();

    let mut files: Vec<PathBuf> = std::fs::read_dir(&folder)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    assert!(files.len() >= 3, "only {} files", files.len());
    assert_eq!(files[0], first);

    let base = first.file_stem().unwrap().to_str().unwrap().to_string();
    assert_eq!(
        files[1].file_name().unwrap().to_str().unwrap(),
        format!("{}_001.trc", base)
    );
    assert_eq!(
        files[2].file_name().unwrap().to_str().unwrap(),
        format!("{}_002.trc", base)
    );

    let mut seqs = Vec::new();
    let mut offsets = Vec::new();
    for file in &files {
        assert!(std::fs::metadata(file).unwrap().len() < 600 + 80);
        for entry in read_trace(file).unwrap() {
            seqs.push(entry.seq);
            offsets.push(entry.offset);
        }
    }
    assert_eq!(seqs, (1..=40).collect::<Vec<u64>>());
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
    assert!((offsets[39] - 0.39).abs() < 1e-3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recorded_trace_replays_into_live_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.cstb");

    let codec: Arc<dyn SignalCodec> = engine_database();
    let mut recorder = TraceRecorder::new(RecorderConfig::default(), codec.clone(), canscope_core::EventBus::default());
    recorder.start();
    for i in 0..5 {
        recorder.on_frames(&[
            Frame::new(0x100, vec![0xB8, 0x0B, 0x84, 0, 0, 0, 0, 0]).with_timestamp(i as f64 * 0.01),
            Frame::new(0x200, vec![i]).with_timestamp(i as f64 * 0.01 + 0.005),
        ]);
    }
    recorder.flush_all();
    assert!(recorder.entries()[0].decoded.contains("EngineSpeed=750.00 rpm"));
    assert_eq!(recorder.export(&path, TraceFormat::Binary).unwrap(), 10);

    let entries = read_trace(&path).unwrap();
    assert_eq!(entries.len(), 10);

    let pipeline = Pipeline::new(fast_config(), codec);
    pipeline.start().unwrap();
    let player = TracePlayer::new(entries, pipeline.dispatcher().clone(), PlayerConfig { speed: None });
    player.start().unwrap();
    assert!(player.wait(Duration::from_secs(2)));

    assert!(wait_until(|| {
        let live = pipeline.live().lock();
        live.len() == 2 && live.rows().iter().all(|r| r.count == 5)
    })
    .await);
    {
        let live = pipeline.live().lock();
        let row = live.find(1, 0x100).and_then(|i| live.row(i)).unwrap();
        assert_eq!(row.symbol, "EngineData");
        assert_eq!(row.signals[0].value, "750.00");
    }
    pipeline.shutdown();
}

// =============================================================================
// Plot
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plot_display_is_downsampled() {
    let pipeline = Pipeline::new(fast_config(), engine_database());
    pipeline.plot().lock().add_signal(0x100, "EngineSpeed", "");
    pipeline.start().unwrap();

    let frames: Vec<Frame> = (0..8000u32)
        .map(|i| {
            let raw = (i % 4000) as u16;
            let [lo, hi] = raw.to_le_bytes();
            Frame::new(0x100, vec![lo, hi, 0, 0, 0, 0, 0, 0]).with_timestamp(i as f64 * 0.001)
        })
        .collect();
    pipeline.dispatcher().dispatch_batch(frames);

    let key = SignalKey::new(0x100, "EngineSpeed");
    assert!(wait_until(|| pipeline.plot().lock().buffer(&key).map(|b| b.len()) == Some(8000)).await);

    let series = pipeline.plot().lock().display_series(&key).unwrap();
    assert_eq!(series.len(), 5000);
    assert_eq!(series.times[0], 0.0);
    assert_eq!(*series.times.last().unwrap(), 7999.0 * 0.001);
    pipeline.shutdown();

    let direct = lttb(&[0.0, 1.0, 2.0, 3.0, 4.0], &[0.0, 5.0, 0.0, -5.0, 0.0], 3);
    assert_eq!(direct.times, vec![0.0, 1.0, 4.0]);
}
