//! # MQTT Client
//!
//! [`MqttClient`] owns everything one broker connection needs: the event
//! dispatcher, the layer chain, the platform shims and the reconnect policy.
//! Nothing runs behind the application's back. Every call only queues work,
//! and the work happens inside [`MqttClient::step`], which also delivers the
//! resulting [`MqttEvent`]s to the handler passed in.
//!
//! ```ignore
//! let options = MqttOptions::new("sensor-7", "broker.local", 1883)?
//!     .with_keep_alive(Duration::from_secs(30));
//! let mut client = MqttClient::new(options, network, EmbassyClock, rng)?;
//! let mut events = EventQueue::<8>::new();
//! client.connect()?;
//! client.subscribe(&[("sensor/7/cmd", QoS::AtLeastOnce)])?;
//! loop {
//!     client.step(&mut events)?;
//!     while let Some(event) = events.pop() {
//!         // ...
//!     }
//! }
//! ```

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use heapless::{String, Vec};

use crate::backoff::{Backoff, BackoffClass, classify};
use crate::bsp::{Clock, NetworkBsp, NoTls, RngBsp, TlsProvider};
use crate::dispatcher::{EventDispatcher, HandleId, TimerId};
use crate::error::MqttError;
use crate::event::{EventHandler, MqttEvent, RequestId};
use crate::layer::logic::Request;
use crate::layer::{ChainScheme, ConnectionShared, ConnectionState, LayerChain, LayerContext, Resume};
use crate::packet::{
    Connect, MAX_CLIENT_ID_LEN, MAX_CREDENTIAL_LEN, MAX_TOPIC_LEN, Publish, QoS, Subscribe, Topic,
    Unsubscribe, Will,
};
use crate::router::{MessageCallback, Routed, SubscriptionRouter};

/// Longest broker host name.
pub const MAX_HOST_LEN: usize = 64;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u8 = 3;
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(512);

/// Application timers that may be pending at once.
pub const MAX_TIMED_TASKS: usize = 4;

/// Longest sleep between two steps of a driver.
const POLL_INTERVAL_MS: u64 = 10;

/// Configuration of one broker connection.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    client_id: String<MAX_CLIENT_ID_LEN>,
    host: String<MAX_HOST_LEN>,
    port: u16,
    keep_alive: Duration,
    clean_session: bool,
    will: Option<Will>,
    username: Option<String<MAX_CREDENTIAL_LEN>>,
    password: Option<Vec<u8, MAX_CREDENTIAL_LEN>>,
    connect_timeout: Duration,
    network_timeout: Option<Duration>,
    ack_timeout: Option<Duration>,
    max_retries: u8,
    max_backoff: Duration,
    max_reconnect_attempts: Option<u32>,
    auto_reconnect: bool,
    scheme: ChainScheme,
    tunnel_topic: Topic,
}

fn copy_str<const N: usize>(s: &str) -> Result<String<N>, MqttError> {
    let mut out = String::new();
    out.push_str(s).map_err(|_| MqttError::InvalidArgument)?;
    Ok(out)
}

impl MqttOptions {
    pub fn new(client_id: &str, host: &str, port: u16) -> Result<Self, MqttError> {
        Ok(Self {
            client_id: copy_str(client_id)?,
            host: copy_str(host)?,
            port,
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            will: None,
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            network_timeout: None,
            ack_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_reconnect_attempts: None,
            auto_reconnect: true,
            scheme: ChainScheme::Plain,
            tunnel_topic: Topic::new(),
        })
    }

    /// Keep-alive interval announced in `CONNECT`. Zero disables pings. The
    /// wire carries whole seconds, up to `u16::MAX`.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_will(mut self, topic: &str, message: &[u8], qos: QoS, retain: bool) -> Result<Self, MqttError> {
        let mut payload = Vec::new();
        payload
            .extend_from_slice(message)
            .map_err(|_| MqttError::InvalidArgument)?;
        self.will = Some(Will {
            topic: copy_str::<MAX_TOPIC_LEN>(topic)?,
            message: payload,
            qos,
            retain,
        });
        Ok(self)
    }

    pub fn with_credentials(mut self, username: &str, password: &[u8]) -> Result<Self, MqttError> {
        let mut secret = Vec::new();
        secret
            .extend_from_slice(password)
            .map_err(|_| MqttError::InvalidArgument)?;
        self.username = Some(copy_str(username)?);
        self.password = Some(secret);
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Closes the socket after `timeout` without any data read or written.
    /// Off by default; keep-alive pings count as traffic.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    /// Time to wait for an acknowledgement before retransmitting. Defaults to
    /// the keep-alive interval.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_scheme(mut self, scheme: ChainScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Topic the gateway scheme tunnels the connection through.
    pub fn with_tunnel_topic(mut self, topic: &str) -> Result<Self, MqttError> {
        self.tunnel_topic = copy_str(topic)?;
        Ok(self)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    pub fn ack_timeout(&self) -> Duration {
        match self.ack_timeout {
            Some(timeout) => timeout,
            None if self.keep_alive.as_ticks() == 0 => DEFAULT_KEEP_ALIVE,
            None => self.keep_alive,
        }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn max_reconnect_attempts(&self) -> Option<u32> {
        self.max_reconnect_attempts
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn scheme(&self) -> ChainScheme {
        self.scheme
    }

    pub fn tunnel_topic(&self) -> &str {
        &self.tunnel_topic
    }

    /// The `CONNECT` packet these options describe.
    pub fn connect_packet(&self) -> Result<Connect, MqttError> {
        let mut connect = Connect::new(&self.client_id, self.keep_alive_secs(), self.clean_session)?;
        connect.will = self.will.clone();
        connect.username = self.username.clone();
        connect.password = self.password.clone();
        Ok(connect)
    }
}

/// Work the client queues on its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientTask {
    Layer(Resume),
    Open,
    Close,
    Reconnect,
    /// The backoff cooldown elapsed.
    Cooldown,
    Timed(TimedTaskId),
}

impl From<Resume> for ClientTask {
    fn from(resume: Resume) -> Self {
        ClientTask::Layer(resume)
    }
}

pub type ClientDispatcher = EventDispatcher<ClientTask, 16, 24, 2, 2>;

/// Identifies a task scheduled with [`MqttClient::schedule_timed_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimedTaskId(pub u16);

/// Runs when an application timer fires.
pub type TimedCallback = fn(TimedTaskId);

#[derive(Clone, Copy)]
struct TimedTask {
    id: TimedTaskId,
    timer: TimerId,
    /// Rescheduled with this period after each run.
    period: Option<Duration>,
    callback: TimedCallback,
}

/// Connection state that outlives single connection attempts.
struct Session<R, T: TlsProvider> {
    chain: LayerChain<T>,
    conn: ConnectionShared,
    backoff: Backoff,
    rng: R,
    reconnect_timer: Option<TimerId>,
    cooldown_timer: Option<TimerId>,
    timed: Vec<TimedTask, MAX_TIMED_TASKS>,
    next_timed: u16,
    /// The application wants a connection.
    wanted: bool,
    /// An attempt is running whose end has not been handled yet.
    attempt: bool,
    established: bool,
}

impl<R: RngBsp, T: TlsProvider> Session<R, T> {
    fn run(
        &mut self,
        sched: &mut ClientDispatcher,
        net: &mut dyn NetworkBsp,
        events: &mut dyn EventHandler,
        task: ClientTask,
    ) {
        match task {
            ClientTask::Layer(resume) => {
                let mut cx = LayerContext::new(&mut self.conn, sched, net, events);
                if let Err(err) = self.chain.resume(&mut cx, resume) {
                    error!("layer task failed: {:?}", err);
                    self.chain.teardown(&mut cx);
                    self.conn.last_error = Some(err);
                }
            }
            ClientTask::Open | ClientTask::Reconnect => {
                if task == ClientTask::Reconnect {
                    self.reconnect_timer = None;
                }
                if self.wanted && !self.conn.state.is_active() {
                    self.open(sched, net, events);
                }
            }
            ClientTask::Close => {
                let mut cx = LayerContext::new(&mut self.conn, sched, net, events);
                if let Err(err) = self.chain.close(&mut cx) {
                    error!("close failed: {:?}", err);
                    self.chain.teardown(&mut cx);
                }
                if !self.attempt {
                    self.chain.logic_mut().fail_all(events, MqttError::NotConnected);
                }
            }
            ClientTask::Cooldown => {
                self.cooldown_timer = None;
                if let Some(delay) = self.backoff.decay() {
                    self.cooldown_timer = sched.execute_in(delay, ClientTask::Cooldown).ok();
                }
            }
            ClientTask::Timed(id) => self.fire(sched, id),
        }
        self.observe(sched, events);
    }

    /// Runs an application timer and re-arms it if it repeats.
    fn fire(&mut self, sched: &mut ClientDispatcher, id: TimedTaskId) {
        let Some(pos) = self.timed.iter().position(|t| t.id == id) else {
            return;
        };
        let task = self.timed[pos];
        match task.period.map(|period| sched.execute_in(period, ClientTask::Timed(id))) {
            Some(Ok(timer)) => self.timed[pos].timer = timer,
            Some(Err(err)) => {
                warn!("cannot re-arm timed task {}: {:?}", id.0, err);
                self.timed.remove(pos);
            }
            None => {
                self.timed.remove(pos);
            }
        }
        (task.callback)(id);
    }

    fn open(&mut self, sched: &mut ClientDispatcher, net: &mut dyn NetworkBsp, events: &mut dyn EventHandler) {
        self.attempt = true;
        self.established = false;
        let mut cx = LayerContext::new(&mut self.conn, sched, net, events);
        if let Err(err) = self.chain.open(&mut cx) {
            warn!("cannot open connection: {:?}", err);
            self.chain.teardown(&mut cx);
            self.conn.state = ConnectionState::OpenFailed;
            self.conn.last_error = Some(err);
        }
    }

    /// Reacts to connection state changes left behind by a task.
    fn observe(&mut self, sched: &mut ClientDispatcher, events: &mut dyn EventHandler) {
        if !self.attempt {
            return;
        }
        match self.conn.state {
            ConnectionState::Opened if !self.established => {
                self.established = true;
                self.backoff.succeed();
            }
            ConnectionState::Closed | ConnectionState::OpenFailed => {
                self.attempt = false;
                self.on_closed(sched, events);
            }
            _ => {}
        }
    }

    fn on_closed(&mut self, sched: &mut ClientDispatcher, events: &mut dyn EventHandler) {
        let outcome = self.conn.last_error;
        if !self.wanted || !self.conn.options.auto_reconnect() {
            self.wanted = false;
            self.chain.logic_mut().fail_all(events, outcome.unwrap_or(MqttError::NotConnected));
            return;
        }
        let level = self.backoff.level();
        let verdict = self.backoff.fail(outcome.as_ref(), &mut self.rng);
        if self.backoff.level() != level {
            if let Some(id) = self.cooldown_timer.take() {
                sched.cancel(id);
            }
            if let Some(delay) = self.backoff.cooldown() {
                self.cooldown_timer = sched.execute_in(delay, ClientTask::Cooldown).ok();
            }
        }
        let scheduled = verdict.map(|delay| (delay, sched.execute_in(delay, ClientTask::Reconnect)));
        match scheduled {
            Some((delay, Ok(id))) => {
                info!("reconnecting in {} ms", delay.as_millis());
                self.reconnect_timer = Some(id);
                events.on_event(MqttEvent::Reconnecting { after: delay });
            }
            Some((_, Err(err))) => {
                error!("cannot schedule reconnect: {:?}", err);
                self.wanted = false;
                self.chain.logic_mut().fail_all(events, err);
            }
            None => {
                warn!("not reconnecting after {:?}", outcome);
                self.wanted = false;
                let err = match outcome {
                    Some(err) if classify(Some(&err)) == BackoffClass::Terminal => err,
                    Some(_) => MqttError::RetryLimitExceeded,
                    None => MqttError::NotConnected,
                };
                self.chain.logic_mut().fail_all(events, err);
            }
        }
    }
}

/// A single broker connection driven by an owned dispatcher.
pub struct MqttClient<N, C, R, T = NoTls>
where
    N: NetworkBsp,
    C: Clock,
    R: RngBsp,
    T: TlsProvider,
{
    dispatcher: ClientDispatcher,
    net: N,
    clock: C,
    session: Session<R, T>,
    router: SubscriptionRouter,
    handle: Option<HandleId>,
    next_request: u32,
}

impl<N, C, R> MqttClient<N, C, R, NoTls>
where
    N: NetworkBsp,
    C: Clock,
    R: RngBsp,
{
    /// A client for the plain or gateway scheme.
    pub fn new(options: MqttOptions, net: N, clock: C, rng: R) -> Result<Self, MqttError> {
        Self::build(options, net, clock, rng, None)
    }
}

impl<N, C, R, T> MqttClient<N, C, R, T>
where
    N: NetworkBsp,
    C: Clock,
    R: RngBsp,
    T: TlsProvider,
{
    /// A client whose chain runs through `provider`.
    pub fn with_tls(options: MqttOptions, net: N, clock: C, rng: R, provider: T) -> Result<Self, MqttError> {
        Self::build(options, net, clock, rng, Some(provider))
    }

    fn build(options: MqttOptions, net: N, clock: C, mut rng: R, provider: Option<T>) -> Result<Self, MqttError> {
        let chain = LayerChain::new(options.scheme(), provider)?;
        let backoff = Backoff::new(options.max_backoff(), options.max_reconnect_attempts());
        let mut dispatcher = ClientDispatcher::new();
        dispatcher.advance(clock.now());
        let handle = dispatcher.register_handle()?;
        rng.init();
        Ok(Self {
            dispatcher,
            net,
            clock,
            session: Session {
                chain,
                conn: ConnectionShared::new(options),
                backoff,
                rng,
                reconnect_timer: None,
                cooldown_timer: None,
                timed: Vec::new(),
                next_timed: 0,
                wanted: false,
                attempt: false,
                established: false,
            },
            router: SubscriptionRouter::new(),
            handle: Some(handle),
            next_request: 0,
        })
    }

    pub fn options(&self) -> &MqttOptions {
        &self.session.conn.options
    }

    pub fn state(&self) -> ConnectionState {
        self.session.conn.state
    }

    /// How the last connection ended.
    pub fn last_error(&self) -> Option<MqttError> {
        self.session.conn.last_error
    }

    pub fn is_connected(&self) -> bool {
        self.session.chain.logic().is_connected()
    }

    /// Requests that have not completed yet.
    pub fn pending_requests(&self) -> usize {
        self.session.chain.logic().pending()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.session.backoff
    }

    pub fn network(&self) -> &N {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.net
    }

    /// Starts connecting on the next step. Reconnects follow automatically
    /// until [`disconnect`](Self::disconnect) unless turned off in the options.
    pub fn connect(&mut self) -> Result<(), MqttError> {
        if self.handle.is_none() {
            return Err(MqttError::NotConnected);
        }
        self.session.wanted = true;
        self.session.backoff.reset();
        self.dispatcher.post(ClientTask::Open)
    }

    /// Sends `DISCONNECT` and closes. Requests still pending complete with
    /// [`MqttError::NotConnected`].
    pub fn disconnect(&mut self) -> Result<(), MqttError> {
        self.session.wanted = false;
        if let Some(id) = self.session.reconnect_timer.take() {
            self.dispatcher.cancel(id);
        }
        self.dispatcher.post(ClientTask::Close)
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<RequestId, MqttError> {
        let publish = Publish::new(topic, payload, qos, retain)?;
        self.submit(Request::Publish(publish))
    }

    pub fn subscribe(&mut self, filters: &[(&str, QoS)]) -> Result<RequestId, MqttError> {
        let subscribe = Subscribe::new(filters)?;
        self.submit(Request::Subscribe(subscribe))
    }

    /// Subscribes to `filter` and hands matching messages to `callback`
    /// instead of the event handler.
    pub fn subscribe_with(
        &mut self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<RequestId, MqttError> {
        let subscribe = Subscribe::new(&[(filter, qos)])?;
        let existed = self.router.contains(filter);
        self.router.add(filter, callback)?;
        let result = self.submit(Request::Subscribe(subscribe));
        if result.is_err() && !existed {
            self.router.remove(filter);
        }
        result
    }

    /// Unsubscribes from `filters` and drops their callbacks.
    pub fn unsubscribe(&mut self, filters: &[&str]) -> Result<RequestId, MqttError> {
        let unsubscribe = Unsubscribe::new(filters)?;
        let id = self.submit(Request::Unsubscribe(unsubscribe))?;
        for filter in filters {
            self.router.remove(filter);
        }
        Ok(id)
    }

    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    /// Runs `callback` after `delay`, and every `delay` after that when
    /// `repeat` is set, until cancelled.
    pub fn schedule_timed_task(
        &mut self,
        delay: Duration,
        repeat: bool,
        callback: TimedCallback,
    ) -> Result<TimedTaskId, MqttError> {
        let session = &mut self.session;
        if self.handle.is_none() {
            return Err(MqttError::NotConnected);
        }
        if session.timed.is_full() {
            return Err(MqttError::OutOfResources);
        }
        session.next_timed = session.next_timed.wrapping_add(1).max(1);
        let id = TimedTaskId(session.next_timed);
        self.dispatcher.advance(self.clock.now());
        let timer = self.dispatcher.execute_in(delay, ClientTask::Timed(id))?;
        let task = TimedTask {
            id,
            timer,
            period: repeat.then_some(delay),
            callback,
        };
        if session.timed.push(task).is_err() {
            self.dispatcher.cancel(timer);
            return Err(MqttError::OutOfResources);
        }
        debug!("timed task {} due in {} ms", id.0, delay.as_millis());
        Ok(id)
    }

    /// Stops a timed task. Returns false if it already ran for the last
    /// time or never existed.
    pub fn cancel_timed_task(&mut self, id: TimedTaskId) -> bool {
        let timed = &mut self.session.timed;
        let Some(pos) = timed.iter().position(|t| t.id == id) else {
            return false;
        };
        let task = timed.remove(pos);
        self.dispatcher.cancel(task.timer);
        true
    }

    /// Timed tasks still due to run.
    pub fn timed_tasks(&self) -> usize {
        self.session.timed.len()
    }

    fn submit(&mut self, request: Request) -> Result<RequestId, MqttError> {
        if !self.session.wanted {
            return Err(MqttError::NotConnected);
        }
        self.next_request = self.next_request.wrapping_add(1);
        let id = RequestId(self.next_request);
        self.session.chain.logic_mut().submit(id, request)?;
        if self.session.chain.is_initialized(0) {
            self.dispatcher.post(ClientTask::Layer(self.session.chain.kick()))?;
        }
        Ok(id)
    }

    /// Runs one dispatcher pass at the clock's current time.
    pub fn step(&mut self, handler: &mut dyn EventHandler) -> Result<usize, MqttError> {
        let Self {
            dispatcher,
            net,
            clock,
            session,
            router,
            ..
        } = self;
        let mut routed = Routed::new(&*router, handler);
        dispatcher.step(clock.now(), net, |sched, net, task| {
            session.run(sched, net, &mut routed, task)
        })
    }

    /// When the next timed work is due. Socket readiness is not included.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.dispatcher.next_deadline()
    }

    pub fn should_continue(&self) -> bool {
        self.dispatcher.should_continue()
    }

    /// How long a driver may sleep before the next step. Capped so socket
    /// readiness is still noticed without a timer.
    pub fn idle_time(&self) -> Duration {
        let cap = Duration::from_millis(POLL_INTERVAL_MS);
        let now = self.clock.now();
        match self.next_deadline() {
            Some(at) if at <= now => Duration::from_ticks(0),
            Some(at) => (at - now).min(cap),
            None => cap,
        }
    }

    /// Steps until [`shutdown`](Self::shutdown), sleeping on `delay` in
    /// between.
    pub fn run_blocking<D: DelayNs>(&mut self, handler: &mut dyn EventHandler, delay: &mut D) -> Result<(), MqttError> {
        while self.should_continue() {
            self.step(handler)?;
            let idle = self.idle_time().as_millis();
            if idle > 0 {
                delay.delay_ms(idle as u32);
            }
        }
        Ok(())
    }

    /// Tears the connection down without network traffic and releases the
    /// client's dispatcher handle. Pending requests fail with
    /// [`MqttError::NotConnected`].
    pub fn shutdown(&mut self, handler: &mut dyn EventHandler) {
        let session = &mut self.session;
        session.wanted = false;
        session.attempt = false;
        for slot in [&mut session.reconnect_timer, &mut session.cooldown_timer] {
            if let Some(id) = slot.take() {
                self.dispatcher.cancel(id);
            }
        }
        for task in core::mem::take(&mut session.timed) {
            self.dispatcher.cancel(task.timer);
        }
        let mut cx = LayerContext::new(&mut session.conn, &mut self.dispatcher, &mut self.net, handler);
        session.chain.teardown(&mut cx);
        session.chain.logic_mut().fail_all(handler, MqttError::NotConnected);
        session.rng.shutdown();
        if let Some(handle) = self.handle.take() {
            self.dispatcher.unregister_handle(handle);
        }
        info!("client shut down");
    }
}
