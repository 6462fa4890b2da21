// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Modbus master: public request API and the worker task that owns
//! the transport.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures_util::StreamExt as _;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::time::{delay_queue, DelayQueue};

use crate::{
    connection::{Connection, ConnectionEvent},
    error::{Error, Result},
    frame::{tunnel::SniffEvent, Address, Coil, Quantity, Request, Response, ResponsePdu, Word},
    transaction::{Transaction, TransactionEvent},
    transport::{
        rtu::RtuTransport, tcp::TcpTransport, tunnel::TunnelTransport, SendError, Transport,
        TransportEvent,
    },
    unit::{Unit, UnitId},
};

pub use crate::transport::{rtu::RtuConfig, tunnel::TunnelConfig};

/// Which framing state machine the master drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConfig {
    /// Serial RTU with CRC-16 and inter-frame gap detection.
    Rtu(RtuConfig),
    /// MBAP-framed stream with transaction id multiplexing.
    Ip,
    /// Slave-side piggyback polling on an RTU bus owned by another master.
    Tunnel(TunnelConfig),
}

/// Master configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport selection, including per-transport options.
    pub transport: TransportConfig,
    /// When `true`, terminal transaction errors are reported only through
    /// the completion value and never forwarded to the error channel.
    pub suppress_transaction_errors: bool,
    /// When `true`, Modbus exception responses spend the retry budget like
    /// retriable errors before being delivered.
    pub retry_on_exception: bool,
    /// Requests in flight at once; the rest queue in FIFO order. Clamped
    /// to at least 1 and to the transport's own ceiling.
    pub max_concurrent_requests: u16,
    /// Target unit when a request does not name one.
    pub default_unit: UnitId,
    /// Retry budget when a request does not name one.
    pub default_max_retries: u8,
    /// Per-attempt response timeout when a request does not name one.
    pub default_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::Ip,
            suppress_transaction_errors: false,
            retry_on_exception: false,
            max_concurrent_requests: 1,
            default_unit: 1,
            default_max_retries: 3,
            default_timeout: Duration::from_millis(1000),
        }
    }
}

/// Per-request overrides and observation options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    unit: Option<UnitId>,
    max_retries: Option<u8>,
    timeout: Option<Duration>,
    events: bool,
}

impl CallOptions {
    /// Target a specific unit instead of the configured default.
    #[must_use]
    pub fn unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Override the retry budget for this request.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Override the per-attempt timeout for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Open a lifecycle event channel on the returned handle.
    #[must_use]
    pub fn events(mut self) -> Self {
        self.events = true;
        self
    }
}

enum Command {
    Submit(Transaction),
    Cancel(usize),
    AttachErrors(mpsc::UnboundedSender<Error>),
    AttachSniffer(mpsc::UnboundedSender<SniffEvent>),
    Destroy,
}

/// Handle of one submitted transaction.
///
/// Await the outcome with [`wait`](Self::wait); dropping the handle does
/// not cancel the request.
#[derive(Debug)]
pub struct TransactionHandle {
    id: usize,
    done: oneshot::Receiver<Result<Response>>,
    events: Option<mpsc::UnboundedReceiver<TransactionEvent>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl TransactionHandle {
    /// Wait for the terminal outcome: the decoded response, a Modbus
    /// exception, or the error of the final attempt.
    pub async fn wait(self) -> Result<Response> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Request cancellation. A response that still arrives is dropped.
    pub fn cancel(&self) {
        let _ = self.cmd_tx.send(Command::Cancel(self.id));
    }

    /// The lifecycle event stream, if requested via
    /// [`CallOptions::events`]. Yields `None` after taking it once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransactionEvent>> {
        self.events.take()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit(txn) => f.debug_tuple("Submit").field(&txn.id()).finish(),
            Self::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            Self::AttachErrors(_) => f.write_str("AttachErrors"),
            Self::AttachSniffer(_) => f.write_str("AttachSniffer"),
            Self::Destroy => f.write_str("Destroy"),
        }
    }
}

/// A Modbus master over one connection.
///
/// All state lives on a dedicated worker task; the master itself is a
/// cheap command-channel handle. Dropping it tears the worker down after
/// cancelling outstanding transactions.
#[derive(Debug)]
pub struct Master {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: AtomicUsize,
    config: Config,
    worker: JoinHandle<()>,
}

impl Master {
    /// Attach a master to a connection and spawn its worker task.
    pub fn attach<C>(mut conn: C, config: Config) -> Result<Self>
    where
        C: Connection + 'static,
    {
        let conn_events = conn.take_events().ok_or_else(|| {
            Error::InvalidOptions("connection event stream already taken".into())
        })?;
        let transport: Box<dyn Transport> = match config.transport {
            TransportConfig::Rtu(rtu_config) => Box::new(RtuTransport::new(rtu_config)),
            TransportConfig::Ip => Box::new(TcpTransport::new()),
            TransportConfig::Tunnel(tunnel_config) => {
                Box::new(TunnelTransport::new(tunnel_config))
            }
        };
        let gate = usize::from(config.max_concurrent_requests.max(1)).min(transport.capacity());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let connected = conn.is_open();
        let worker = Worker {
            conn: Box::new(conn),
            conn_events,
            conn_gone: false,
            cmds: cmd_rx,
            transport,
            pending: VecDeque::new(),
            timeouts: DelayQueue::new(),
            timeout_keys: HashMap::new(),
            connected,
            gate,
            suppress_transaction_errors: config.suppress_transaction_errors,
            retry_on_exception: config.retry_on_exception,
            error_tx: None,
            sniff_tx: None,
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            cmd_tx,
            next_id: AtomicUsize::new(1),
            config,
            worker,
        })
    }

    /// Submit an arbitrary request.
    ///
    /// This is also the road to operations without a dedicated method,
    /// e.g. file record access.
    pub fn call(&self, request: Request, opts: CallOptions) -> Result<TransactionHandle> {
        let unit = Unit::target(opts.unit.unwrap_or(self.config.default_unit))?;
        let max_retries = opts.max_retries.unwrap_or(self.config.default_max_retries);
        let timeout = opts.timeout.unwrap_or(self.config.default_timeout);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let (events_tx, events_rx) = if opts.events {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let transaction =
            Transaction::new(id, request, unit, max_retries, timeout, done_tx, events_tx);
        self.cmd_tx
            .send(Command::Submit(transaction))
            .map_err(|_| Error::ConnectionClosed)?;

        Ok(TransactionHandle {
            id,
            done: done_rx,
            events: events_rx,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// Read coils (0x01).
    pub fn read_coils(
        &self,
        address: Address,
        quantity: Quantity,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_coils(address, quantity)?, opts)
    }

    /// Read discrete inputs (0x02).
    pub fn read_discrete_inputs(
        &self,
        address: Address,
        quantity: Quantity,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_discrete_inputs(address, quantity)?, opts)
    }

    /// Read holding registers (0x03).
    pub fn read_holding_registers(
        &self,
        address: Address,
        quantity: Quantity,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_holding_registers(address, quantity)?, opts)
    }

    /// Read input registers (0x04).
    pub fn read_input_registers(
        &self,
        address: Address,
        quantity: Quantity,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_input_registers(address, quantity)?, opts)
    }

    /// Write a single coil (0x05).
    pub fn write_single_coil(
        &self,
        address: Address,
        value: Coil,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_single_coil(address, value)?, opts)
    }

    /// Write a single holding register (0x06).
    pub fn write_single_register(
        &self,
        address: Address,
        value: Word,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_single_register(address, value)?, opts)
    }

    /// Issue a diagnostics sub-function (0x08).
    pub fn read_diagnostics(
        &self,
        sub_function: Word,
        data: Word,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_diagnostics(sub_function, data)?, opts)
    }

    /// Write multiple coils (0x0F).
    pub fn write_multiple_coils(
        &self,
        address: Address,
        values: Vec<Coil>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_multiple_coils(address, values)?, opts)
    }

    /// Write multiple holding registers (0x10).
    pub fn write_multiple_registers(
        &self,
        address: Address,
        values: Vec<Word>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_multiple_registers(address, values)?, opts)
    }

    /// Query the slave identification (0x11).
    pub fn report_slave_id(&self, opts: CallOptions) -> Result<TransactionHandle> {
        self.call(Request::report_slave_id(), opts)
    }

    /// Read from an 8-bit fifo (0x41).
    pub fn read_fifo8(
        &self,
        id: u8,
        max_count: u8,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_fifo8(id, max_count)?, opts)
    }

    /// Write into an 8-bit fifo (0x42).
    pub fn write_fifo8(
        &self,
        id: u8,
        data: Vec<u8>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_fifo8(id, data)?, opts)
    }

    /// Read a vendor object (0x43).
    pub fn read_object(&self, id: u8, opts: CallOptions) -> Result<TransactionHandle> {
        self.call(Request::read_object(id), opts)
    }

    /// Write a vendor object (0x44).
    pub fn write_object(
        &self,
        id: u8,
        data: Vec<u8>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_object(id, data)?, opts)
    }

    /// Read raw memory (0x45).
    pub fn read_memory(
        &self,
        address: Address,
        count: u8,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::read_memory(address, count)?, opts)
    }

    /// Write raw memory (0x46).
    pub fn write_memory(
        &self,
        address: Address,
        data: Vec<u8>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::write_memory(address, data)?, opts)
    }

    /// Issue a vendor command (0x47).
    pub fn command(
        &self,
        id: u8,
        data: Vec<u8>,
        opts: CallOptions,
    ) -> Result<TransactionHandle> {
        self.call(Request::command(id, data)?, opts)
    }

    /// Open a channel carrying terminal transaction errors and
    /// connection-level errors.
    ///
    /// Nothing is delivered while `suppress_transaction_errors` is set.
    /// Calling again replaces the previous channel.
    pub fn errors(&self) -> mpsc::UnboundedReceiver<Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Command::AttachErrors(tx));
        rx
    }

    /// Open the passive monitoring channel of the tunnel transport.
    ///
    /// Other transports never produce sniff events. Calling again replaces
    /// the previous channel.
    pub fn sniffer(&self) -> mpsc::UnboundedReceiver<SniffEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(Command::AttachSniffer(tx));
        rx
    }

    /// Cancel queued and in-flight transactions and tear down the
    /// transport and connection.
    pub fn destroy(&self) {
        let _ = self.cmd_tx.send(Command::Destroy);
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.destroy();
        self.worker.abort();
    }
}

enum Step {
    Conn(Option<ConnectionEvent>),
    Cmd(Option<Command>),
    Expired(usize),
    IdleGap,
}

struct Worker {
    conn: Box<dyn Connection>,
    conn_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    conn_gone: bool,
    cmds: mpsc::UnboundedReceiver<Command>,
    transport: Box<dyn Transport>,
    pending: VecDeque<Transaction>,
    timeouts: DelayQueue<usize>,
    timeout_keys: HashMap<usize, delay_queue::Key>,
    connected: bool,
    gate: usize,
    suppress_transaction_errors: bool,
    retry_on_exception: bool,
    error_tx: Option<mpsc::UnboundedSender<Error>>,
    sniff_tx: Option<mpsc::UnboundedSender<SniffEvent>>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let idle = self.transport.idle_deadline();
            let step = tokio::select! {
                biased;
                ev = self.conn_events.recv(), if !self.conn_gone => Step::Conn(ev),
                Some(expired) = self.timeouts.next() => Step::Expired(expired.into_inner()),
                () = tokio::time::sleep_until(idle.unwrap_or_else(Instant::now)), if idle.is_some() => Step::IdleGap,
                cmd = self.cmds.recv() => Step::Cmd(cmd),
            };

            let mut events = Vec::new();
            match step {
                Step::Conn(Some(ConnectionEvent::Open)) => {
                    log::debug!("connection is open");
                    self.connected = true;
                }
                Step::Conn(Some(ConnectionEvent::Data(data))) => {
                    self.transport
                        .feed(&data, self.conn.as_mut(), &mut events)
                        .await;
                }
                Step::Conn(Some(ConnectionEvent::Error(err))) => {
                    log::warn!("connection error: {err}");
                    self.forward_error(Error::Io(err));
                }
                Step::Conn(Some(ConnectionEvent::Close)) => {
                    log::debug!("connection closed");
                    self.on_close();
                }
                Step::Conn(None) => {
                    self.conn_gone = true;
                    self.on_close();
                }
                Step::Cmd(Some(Command::Submit(transaction))) => {
                    self.pending.push_back(transaction);
                }
                Step::Cmd(Some(Command::Cancel(id))) => self.cancel(id),
                Step::Cmd(Some(Command::AttachErrors(tx))) => self.error_tx = Some(tx),
                Step::Cmd(Some(Command::AttachSniffer(tx))) => self.sniff_tx = Some(tx),
                Step::Cmd(Some(Command::Destroy)) | Step::Cmd(None) => {
                    self.shutdown();
                    return;
                }
                Step::Expired(id) => self.on_timeout(id).await,
                Step::IdleGap => {
                    self.transport
                        .on_idle_gap(self.conn.as_mut(), &mut events)
                        .await;
                }
            }

            for event in events {
                match event {
                    TransportEvent::Reconciled {
                        transaction,
                        result,
                    } => self.reconcile(transaction, result).await,
                    TransportEvent::Sniff(sniff) => {
                        if let Some(tx) = &self.sniff_tx {
                            let _ = tx.send(sniff);
                        }
                    }
                }
            }

            self.pump().await;
        }
    }

    /// Drain the pending queue into the transport while the gate has room.
    async fn pump(&mut self) {
        while self.connected
            && self.transport.in_flight() < self.gate
            && !self.pending.is_empty()
        {
            let Some(transaction) = self.pending.pop_front() else {
                break;
            };
            if !self.issue(transaction).await {
                break;
            }
        }
    }

    /// Hand one transaction to the transport. Returns `false` when the
    /// transport is at capacity and pumping should stop.
    async fn issue(&mut self, transaction: Transaction) -> bool {
        let id = transaction.id();
        let timeout = transaction.timeout();
        match self
            .transport
            .send_request(transaction, self.conn.as_mut())
            .await
        {
            Ok(()) => {
                self.arm_timeout(id, timeout);
                true
            }
            Err(SendError {
                transaction,
                error: Error::TooManyRequests,
            }) => {
                self.pending.push_front(transaction);
                false
            }
            Err(SendError { transaction, error }) => {
                self.finish(transaction, Err(error), true);
                true
            }
        }
    }

    async fn reconcile(
        &mut self,
        mut transaction: Transaction,
        result: std::result::Result<ResponsePdu, Error>,
    ) {
        self.clear_timeout(transaction.id());
        match result {
            Ok(ResponsePdu(Ok(response))) => {
                transaction.complete(Ok(response));
            }
            Ok(ResponsePdu(Err(exception))) => {
                if self.retry_on_exception && transaction.consume_retry() {
                    log::debug!(
                        "transaction {}: retrying after exception: {exception}",
                        transaction.id()
                    );
                    self.issue(transaction).await;
                } else {
                    // Without retry_on_exception an exception is a regular
                    // outcome and stays off the error channel.
                    let propagate = self.retry_on_exception;
                    self.finish(transaction, Err(Error::Exception(exception)), propagate);
                }
            }
            Err(error) => {
                if error.is_retriable() && transaction.consume_retry() {
                    log::debug!("transaction {}: retrying after: {error}", transaction.id());
                    self.issue(transaction).await;
                } else {
                    self.finish(transaction, Err(error), true);
                }
            }
        }
    }

    async fn on_timeout(&mut self, id: usize) {
        self.timeout_keys.remove(&id);
        let Some(mut transaction) = self.transport.take(id) else {
            return;
        };
        transaction.emit(TransactionEvent::Timeout {
            retries_left: transaction.retries_left(),
        });
        if transaction.consume_retry() && self.connected {
            log::debug!("transaction {id}: timed out, retrying");
            self.issue(transaction).await;
        } else {
            self.finish(transaction, Err(Error::Timeout), true);
        }
    }

    fn cancel(&mut self, id: usize) {
        if let Some(pos) = self.pending.iter().position(|txn| txn.id() == id) {
            if let Some(transaction) = self.pending.remove(pos) {
                transaction.cancel();
            }
            return;
        }
        if let Some(transaction) = self.transport.take(id) {
            self.clear_timeout(id);
            transaction.cancel();
        }
    }

    fn on_close(&mut self) {
        self.connected = false;
        for transaction in self.transport.drain_in_flight() {
            self.finish(transaction, Err(Error::ConnectionClosed), true);
        }
    }

    fn shutdown(&mut self) {
        for transaction in std::mem::take(&mut self.pending) {
            transaction.cancel();
        }
        for transaction in self.transport.drain_in_flight() {
            self.clear_timeout(transaction.id());
            transaction.cancel();
        }
        self.conn.destroy();
    }

    fn finish(
        &mut self,
        transaction: Transaction,
        result: Result<Response>,
        propagate: bool,
    ) {
        self.clear_timeout(transaction.id());
        if let Err(err) = &result {
            log::warn!("transaction {} failed: {err}", transaction.id());
            if propagate {
                self.forward_error(err.clone_shallow());
            }
        }
        transaction.complete(result);
    }

    fn forward_error(&self, error: Error) {
        if self.suppress_transaction_errors {
            return;
        }
        if let Some(tx) = &self.error_tx {
            let _ = tx.send(error);
        }
    }

    fn arm_timeout(&mut self, id: usize, timeout: Duration) {
        let key = self.timeouts.insert(id, timeout);
        self.timeout_keys.insert(id, key);
    }

    fn clear_timeout(&mut self, id: usize) {
        if let Some(key) = self.timeout_keys.remove(&id) {
            self.timeouts.try_remove(&key);
        }
    }
}
