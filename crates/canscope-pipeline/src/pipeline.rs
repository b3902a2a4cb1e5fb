//! Pipeline assembly
//!
//! Wires the connection service, dispatcher, filter, the four consumers and
//! the transmitter together, and owns their periodic tasks.

use std::sync::Arc;

use canscope_bus::{BusConfig, ConnectionService};
use canscope_core::{EventBus, PipelineEvent, SignalCodec, TxCounts};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::consumer::{spawn_consumer, spawn_periodic, Shared};
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, PipelineResult};
use crate::filter::{RxFilter, SharedFilter};
use crate::live::LiveTable;
use crate::plot::PlotStore;
use crate::trace::{RecorderConfig, TraceRecorder};
use crate::transmit::{Transmitter, TxTable};
use crate::watch::WatchRegistry;

/// A complete receive/record/transmit pipeline
pub struct Pipeline {
    config: PipelineConfig,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    filter: SharedFilter,
    live: Arc<Shared<LiveTable>>,
    watch: Arc<Shared<WatchRegistry>>,
    trace: Arc<Shared<TraceRecorder>>,
    plot: Arc<Shared<PlotStore>>,
    tx_table: Arc<Mutex<TxTable>>,
    tx_counts: Arc<Mutex<mpsc::UnboundedReceiver<TxCounts>>>,
    transmitter: Transmitter,
    connections: Arc<ConnectionService>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, codec: Arc<dyn SignalCodec>) -> Self {
        Self::with_filter(config, codec, RxFilter::default())
    }

    pub fn with_filter(config: PipelineConfig, codec: Arc<dyn SignalCodec>, filter: RxFilter) -> Self {
        let events = EventBus::new(config.event_capacity.max(1));
        let dispatcher = Arc::new(Dispatcher::new());
        let filter = filter.shared();

        let live = Shared::new(LiveTable::new(codec.clone(), filter.clone(), events.clone()));
        let watch = Shared::new(WatchRegistry::new(codec.clone(), events.clone()));
        let trace = Shared::new(TraceRecorder::new(
            RecorderConfig::from(&config),
            codec.clone(),
            events.clone(),
        ));
        let mut plot_store = PlotStore::new(codec.clone(), events.clone());
        plot_store.set_time_window(config.plot_window_secs);
        plot_store.set_display_points(config.plot_display_points);
        let plot = Shared::new(plot_store);

        dispatcher.register(live.clone());
        dispatcher.register(watch.clone());
        dispatcher.register(trace.clone());
        dispatcher.register(plot.clone());

        let connections = Arc::new(ConnectionService::new(
            dispatcher.clone(),
            events.clone(),
            config.receiver.clone(),
        ));

        let tx_table = TxTable::new(codec, config.tx_snapshot_interval());
        let (counts_tx, counts_rx) = mpsc::unbounded_channel();
        let transmitter = Transmitter::new(
            connections.clone(),
            tx_table.subscribe(),
            counts_tx,
            events.clone(),
            config.tx_counter_interval(),
        );

        Self {
            config,
            events,
            dispatcher,
            filter,
            live,
            watch,
            trace,
            plot,
            tx_table: Arc::new(Mutex::new(tx_table)),
            tx_counts: Arc::new(Mutex::new(counts_rx)),
            transmitter,
            connections,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the consumer tasks and start the transmitter
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> PipelineResult<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(PipelineError::AlreadyStarted);
        }

        tasks.push(spawn_consumer(self.live.clone(), self.config.live_interval()));
        tasks.push(spawn_consumer(self.watch.clone(), self.config.watch_interval()));
        tasks.push(spawn_consumer(self.trace.clone(), self.config.trace_flush_interval()));
        tasks.push(spawn_consumer(self.plot.clone(), self.config.plot_interval()));

        let trace = self.trace.clone();
        tasks.push(spawn_periodic(
            "trace-commit",
            self.config.trace_commit_interval(),
            move || trace.lock().commit(),
        ));

        let table = self.tx_table.clone();
        let counts = self.tx_counts.clone();
        tasks.push(spawn_periodic(
            "tx-table",
            self.config.tx_counter_interval(),
            move || sync_tx_table(&table, &counts),
        ));

        // A rebuild deferred by coalescing must not wait for the next count report
        let table = self.tx_table.clone();
        tasks.push(spawn_periodic(
            "tx-snapshot",
            self.config.tx_snapshot_poll_interval(),
            move || {
                table.lock().poll();
            },
        ));

        self.tx_table.lock().rebuild_now();
        self.transmitter.start()?;

        tracing::info!(
            sinks = self.dispatcher.sink_count(),
            buses = self.connections.len(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Stop receivers and the transmitter, flush everything and end tasks
    pub fn shutdown(&self) {
        self.connections.disconnect_all();
        self.transmitter.stop();
        sync_tx_table(&self.tx_table, &self.tx_counts);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        self.live.process();
        self.watch.process();
        self.plot.process();
        self.trace.drain();
        {
            let mut trace = self.trace.lock();
            if trace.is_recording() || trace.current_file().is_some() {
                trace.stop();
            } else {
                trace.flush_all();
            }
            trace.commit();
        }
        tracing::info!("Pipeline shut down");
    }

    pub fn is_started(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Add a bus connection from configuration
    pub fn add_bus(&self, config: &BusConfig) -> usize {
        self.connections.add_bus(config)
    }

    /// Replace the codec everywhere and re-resolve symbols
    pub fn set_codec(&self, codec: Arc<dyn SignalCodec>) {
        {
            let mut live = self.live.lock();
            live.set_codec(codec.clone());
            live.refresh_symbols();
        }
        self.watch.lock().set_codec(codec.clone());
        self.trace.lock().set_codec(codec.clone());
        self.plot.lock().set_codec(codec.clone());
        let mut table = self.tx_table.lock();
        table.set_codec(codec);
        table.refresh_signals();
        table.request_rebuild();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn filter(&self) -> &SharedFilter {
        &self.filter
    }

    pub fn live(&self) -> &Arc<Shared<LiveTable>> {
        &self.live
    }

    pub fn watch(&self) -> &Arc<Shared<WatchRegistry>> {
        &self.watch
    }

    pub fn trace(&self) -> &Arc<Shared<TraceRecorder>> {
        &self.trace
    }

    pub fn plot(&self) -> &Arc<Shared<PlotStore>> {
        &self.plot
    }

    pub fn tx_table(&self) -> &Arc<Mutex<TxTable>> {
        &self.tx_table
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn connections(&self) -> &Arc<ConnectionService> {
        &self.connections
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Apply reported send counts and publish a deferred snapshot
fn sync_tx_table(table: &Mutex<TxTable>, counts: &Mutex<mpsc::UnboundedReceiver<TxCounts>>) {
    let mut table = table.lock();
    let mut counts = counts.lock();
    while let Ok(delta) = counts.try_recv() {
        table.apply_counts(&delta);
    }
    table.poll();
}
