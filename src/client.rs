//! Top-level client wiring the CnC file, conductor, and agent runner

use std::sync::Arc;

use crate::{
    cnc::CncFile,
    conductor::{ClientConductor, ClientLink},
    concurrent::{
        agent::AgentRunner,
        broadcast::{BroadcastReceiver, CopyBroadcastReceiver},
        counters::CountersReader,
        error_log::{self, ErrorObservation},
        ringbuffer::ManyToOneRingBuffer,
    },
    context::Context,
    driver::{DriverListenerAdapter, DriverProxy},
    error::Result,
    publication::Publication,
    subscription::Subscription,
};

/// Entry point for talking to the media driver.
///
/// Maps the CnC file, validates the protocol version, and spawns the
/// conductor on its own thread. `add_*` calls return immediately with a
/// registration id; poll the matching `find_*` until the driver has
/// answered.
#[derive(Debug)]
pub struct Tern {
    link: Arc<ClientLink>,
    runner: AgentRunner,
    cnc: CncFile,
}

impl Tern {
    /// Connect to the media driver described by the context
    pub fn connect(context: Context) -> Result<Self> {
        let cnc = CncFile::map(context.dir())?;

        tracing::info!(
            dir = %context.dir().display(),
            liveness_timeout_ns = cnc.client_liveness_timeout_ns(),
            "mapped CnC file"
        );

        let to_driver = ManyToOneRingBuffer::new(cnc.to_driver_buffer())?;
        let proxy = DriverProxy::new(to_driver);
        let adapter = DriverListenerAdapter::new(CopyBroadcastReceiver::new(
            BroadcastReceiver::new(cnc.to_clients_buffer())?,
        ));

        let link = Arc::new(ClientLink::new(proxy, cnc.clone()));
        let conductor = ClientConductor::new(
            Arc::clone(&link),
            adapter,
            cnc.counter_values_buffer(),
            &context,
        );

        let runner = AgentRunner::start(
            conductor,
            context.idle_strategy().create(),
            context.error_handler(),
        );

        Ok(Self { link, runner, cnc })
    }

    /// Client id assigned from the driver's correlation counter
    pub fn client_id(&self) -> i64 {
        self.link.proxy().client_id()
    }

    /// Is the driver still proving liveness?
    pub fn is_driver_active(&self) -> bool {
        self.link.is_driver_active()
    }

    /// Register a publication; non-blocking, returns the registration id
    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.link.add_publication(channel, stream_id)
    }

    /// Look up a publication added earlier.
    ///
    /// `Ok(None)` until the driver has answered; an error if the driver
    /// rejected the registration (consumed on first observation).
    pub fn find_publication(&self, registration_id: i64) -> Result<Option<Arc<Publication>>> {
        self.link.find_publication(registration_id)
    }

    /// Register a subscription; non-blocking, returns the registration id
    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.link.add_subscription(channel, stream_id)
    }

    /// Look up a subscription added earlier; same contract as
    /// [`Tern::find_publication`]
    pub fn find_subscription(&self, registration_id: i64) -> Result<Option<Arc<Subscription>>> {
        self.link.find_subscription(registration_id)
    }

    /// Reader over the driver's counters
    pub fn counters_reader(&self) -> CountersReader {
        CountersReader::new(
            self.cnc.counter_metadata_buffer(),
            self.cnc.counter_values_buffer(),
        )
    }

    /// Read distinct errors the driver has recorded since the timestamp
    pub fn read_driver_errors(
        &self,
        since_timestamp_ms: i64,
        consumer: impl FnMut(&ErrorObservation),
    ) -> usize {
        error_log::read(&self.cnc.error_log_buffer(), since_timestamp_ms, consumer)
    }

    /// Stop the conductor and join its thread. Idempotent; also runs on
    /// drop.
    pub fn close(&mut self) {
        self.runner.close();
    }
}
