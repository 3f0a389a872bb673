//! Async driver for [`MqttClient`].
//!
//! The client itself never awaits. [`MqttRuntime`] steps it and then sleeps
//! until the next deadline, waking early when a producer task hands over a
//! [`PublishRequest`](super::PublishRequest).
//!
//! ```ignore
//! static PUBLISH_CHANNEL: PublishRequestChannel<'static, 4> = Channel::new();
//!
//! #[embassy_executor::task]
//! async fn mqtt_task(client: MqttClient<TcpNetwork<'static, 1>, EmbassyClock, Rng>) {
//!     let mut runtime = MqttRuntime::new(client, Telemetry::new(), PUBLISH_CHANNEL.receiver());
//!     runtime.client_mut().connect().unwrap();
//!     let _ = runtime.run(&mut Delay).await;
//! }
//! ```

use embassy_futures::select::{Either, select};
use embedded_hal_async::delay::DelayNs;

use super::publisher::{PublishRequest, PublishRequestReceiver};
use crate::bsp::{Clock, NetworkBsp, NoTls, RngBsp, TlsProvider};
use crate::client::MqttClient;
use crate::error::MqttError;
use crate::event::EventHandler;

pub struct MqttRuntime<'a, N, C, R, H, const OUTBOX_DEPTH: usize, T = NoTls>
where
    N: NetworkBsp,
    C: Clock,
    R: RngBsp,
    T: TlsProvider,
    H: EventHandler,
{
    client: MqttClient<N, C, R, T>,
    handler: H,
    publish_rx: PublishRequestReceiver<'a, OUTBOX_DEPTH>,
}

impl<'a, N, C, R, H, const OUTBOX_DEPTH: usize, T> MqttRuntime<'a, N, C, R, H, OUTBOX_DEPTH, T>
where
    N: NetworkBsp,
    C: Clock,
    R: RngBsp,
    T: TlsProvider,
    H: EventHandler,
{
    pub fn new(
        client: MqttClient<N, C, R, T>,
        handler: H,
        publish_rx: PublishRequestReceiver<'a, OUTBOX_DEPTH>,
    ) -> Self {
        Self {
            client,
            handler,
            publish_rx,
        }
    }

    pub fn client(&self) -> &MqttClient<N, C, R, T> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut MqttClient<N, C, R, T> {
        &mut self.client
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Runs until the client is shut down.
    pub async fn run<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), MqttError> {
        info!("mqtt runtime started");
        while self.client.should_continue() {
            self.run_once(delay).await?;
        }
        info!("mqtt runtime stopped");
        Ok(())
    }

    /// One step of the client followed by one wait.
    pub async fn run_once<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), MqttError> {
        self.client.step(&mut self.handler)?;

        let idle = self.client.idle_time().as_millis().min(u64::from(u32::MAX)) as u32;
        if idle == 0 {
            if let Ok(request) = self.publish_rx.try_receive() {
                self.forward(request);
            }
            return Ok(());
        }
        let woken = select(delay.delay_ms(idle), self.publish_rx.receive()).await;
        if let Either::Second(request) = woken {
            self.forward(request);
        }
        Ok(())
    }

    /// Stops the client and hands back its parts.
    pub fn shutdown(mut self) -> (MqttClient<N, C, R, T>, H) {
        self.client.shutdown(&mut self.handler);
        (self.client, self.handler)
    }

    fn forward(&mut self, request: PublishRequest<'a>) {
        if let Err(err) = self
            .client
            .publish(request.topic, request.payload, request.qos, request.retain)
        {
            warn!("dropping publish request: {:?}", err);
        }
    }
}
