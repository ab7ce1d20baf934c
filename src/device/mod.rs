//! Device and module namespaces.
//!
//! [`Pace`] owns the engine (and through it the transport, the lock and the
//! cache). Attribute access is expressed once, in the [`Controller`] trait
//! and on [`Module`], over anything that can [`Dispatch`] a request:
//!
//! - on a `Pace<E>` a call executes immediately and returns `E::Reply<T>`
//! - on a [`BatchScope`] the same call is queued and returns a [`Slot<T>`]
//!
//! # Example
//! ```
//! use pace_scpi::device::{Controller, Pace};
//! use pace_scpi::transport::MockTransport;
//!
//! let mock = MockTransport::new().with_replies([":SENS1:PRES 34.567;:SENS2:PRES 1.5"]);
//! let pace = Pace::blocking(mock);
//!
//! let scope = pace.batch().unwrap();
//! let p1 = scope.module(1).unwrap().pressure().unwrap();
//! let p2 = scope.module(2).unwrap().pressure().unwrap();
//! let replies = scope.finish().unwrap();
//!
//! assert_eq!(replies.get(p1).unwrap(), 34.567);
//! assert_eq!(replies.get(p2).unwrap(), 1.5);
//! ```

use crate::attribute::{Attribute, DynAttribute, Request};
use crate::batch::{Batch, Replies, Slot, DEFAULT_MAX_LINE};
use crate::codec::{SerialNumbers, StartupMode, SystemError};
use crate::engine::{BlockingEngine, Engine, FutureEngine, TransportKind};
use crate::error::{PaceError, PaceResult};
use crate::transport::{Address, AsyncTransport, BlockingTcpTransport, BlockingTransport, TcpTransport};
use crate::value::{AttrValue, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod attributes;
mod module;

pub use module::Module;

/// Modules fitted to a standard controller.
pub const DEFAULT_MODULES: [u8; 2] = [1, 2];

/// Routes a rendered request to wherever it should go.
pub trait Dispatch {
    /// Result of a dispatched request.
    type Reply<T: AttrValue>;

    fn dispatch<T: AttrValue>(&self, request: PaceResult<Request<T>>) -> Self::Reply<T>;

    /// Module ids known to the device.
    fn module_ids(&self) -> &[u8];
}

/// Device-scope attributes, available on a device and on its batch scope.
pub trait Controller: Dispatch + Sized {
    fn read<T: AttrValue>(&self, attribute: &Attribute<T>) -> Self::Reply<T> {
        self.dispatch(attribute.query(None))
    }

    fn write<T: AttrValue>(&self, attribute: &Attribute<T>, value: T) -> Self::Reply<T> {
        self.dispatch(attribute.command(None, value))
    }

    /// Identification string (cached).
    fn idn(&self) -> Self::Reply<String> {
        self.read(&attributes::IDN)
    }

    /// Run the hardware self test.
    fn hw_test(&self) -> Self::Reply<bool> {
        self.read(&attributes::HW_TEST)
    }

    fn mac(&self) -> Self::Reply<String> {
        self.read(&attributes::MAC)
    }

    fn task(&self) -> Self::Reply<String> {
        self.read(&attributes::TASK)
    }

    /// Pop the oldest entry of the device error queue.
    fn error(&self) -> Self::Reply<SystemError> {
        self.read(&attributes::ERROR)
    }

    fn version(&self) -> Self::Reply<String> {
        self.read(&attributes::VERSION)
    }

    fn world_area(&self) -> Self::Reply<String> {
        self.read(&attributes::WORLD_AREA)
    }

    fn startup_mode(&self) -> Self::Reply<StartupMode> {
        self.read(&attributes::STARTUP_MODE)
    }

    fn set_startup_mode(&self, mode: StartupMode) -> Self::Reply<StartupMode> {
        self.write(&attributes::STARTUP_MODE, mode)
    }

    fn serial_numbers(&self) -> Self::Reply<SerialNumbers> {
        self.read(&attributes::SERIAL_NUMBERS)
    }

    fn module(&self, id: u8) -> PaceResult<Module<'_, Self>> {
        if self.module_ids().contains(&id) {
            Ok(Module::new(self, id))
        } else {
            Err(PaceError::UnknownModule(id))
        }
    }

    fn modules(&self) -> Vec<Module<'_, Self>> {
        self.module_ids()
            .iter()
            .map(|id| Module::new(self, *id))
            .collect()
    }

    /// Read an attribute by name. Module-scoped attributes need `module`.
    fn read_named(&self, name: &str, module: Option<u8>) -> Self::Reply<Value> {
        self.dispatch(named(self.module_ids(), name, module).and_then(|a| a.query_value(module)))
    }

    /// Write an attribute by name from a dynamic value.
    fn write_named(&self, name: &str, module: Option<u8>, value: &Value) -> Self::Reply<Value> {
        self.dispatch(named(self.module_ids(), name, module).and_then(|a| a.command_value(module, value)))
    }
}

impl<D: Dispatch> Controller for D {}

fn named(modules: &[u8], name: &str, module: Option<u8>) -> PaceResult<&'static dyn DynAttribute> {
    if let Some(id) = module {
        if !modules.contains(&id) {
            return Err(PaceError::UnknownModule(id));
        }
    }
    attributes::find(name).ok_or_else(|| PaceError::UnknownAttribute(name.to_string()))
}

/// A PACE pressure controller.
///
/// The execution mode is fixed by the engine type: `Pace<BlockingEngine>`
/// returns values, `Pace<FutureEngine>` returns spawned futures.
pub struct Pace<E: Engine> {
    engine: E,
    modules: Vec<u8>,
    max_line: usize,
    batch_open: AtomicBool,
}

impl Pace<BlockingEngine> {
    pub fn blocking(transport: impl BlockingTransport + 'static) -> Self {
        Self::new(BlockingEngine::new(transport))
    }

    /// Open a blocking TCP connection.
    pub fn connect_blocking(address: &Address, connect_timeout: Duration, timeout: Duration) -> PaceResult<Self> {
        let transport =
            BlockingTcpTransport::connect(address, connect_timeout, timeout).map_err(PaceError::transport)?;
        Ok(Self::blocking(transport))
    }
}

impl Pace<FutureEngine> {
    pub fn asynchronous(transport: impl AsyncTransport + 'static) -> Self {
        Self::new(FutureEngine::new(transport))
    }

    /// Open an async TCP connection.
    pub async fn connect(address: &Address, connect_timeout: Duration, timeout: Duration) -> PaceResult<Self> {
        let transport = TcpTransport::connect(address, connect_timeout, timeout)
            .await
            .map_err(PaceError::transport)?;
        Ok(Self::asynchronous(transport))
    }
}

impl<E: Engine> Pace<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            modules: DEFAULT_MODULES.to_vec(),
            max_line: DEFAULT_MAX_LINE,
            batch_open: AtomicBool::new(false),
        }
    }

    pub fn with_modules(mut self, modules: impl IntoIterator<Item = u8>) -> Self {
        self.modules = modules.into_iter().collect();
        self
    }

    /// Set the batch line ceiling.
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn kind(&self) -> TransportKind {
        E::KIND
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    /// Open the batching scope. Only one scope may be open at a time, and
    /// only calls made through the returned handle join it.
    pub fn batch(&self) -> PaceResult<BatchScope<'_, E>> {
        if self.batch_open.swap(true, Ordering::SeqCst) {
            return Err(PaceError::BatchAlreadyOpen);
        }
        Ok(BatchScope {
            device: self,
            batch: Mutex::new(Batch::new(self.max_line)),
        })
    }

    pub fn is_batch_open(&self) -> bool {
        self.batch_open.load(Ordering::SeqCst)
    }

    /// Send a raw line. Queries return the reply text.
    pub fn raw(&self, line: &str) -> E::Reply<String> {
        self.engine.raw(line)
    }

    pub fn close(&self) -> E::Reply<()> {
        self.engine.close()
    }

    pub fn clear_cache(&self) {
        self.engine.clear_cache();
    }

    /// Read every readable attribute of a module (or, with `None`, of the
    /// device) in one batch. Results are labelled with attribute names.
    pub fn dump(&self, module: Option<u8>) -> E::Reply<Replies> {
        let table = if module.is_some() {
            attributes::MODULE_ATTRIBUTES
        } else {
            attributes::DEVICE_ATTRIBUTES
        };
        let scope = match self.batch() {
            Ok(scope) => scope,
            Err(error) => return self.engine.fail(error),
        };
        for attribute in table.iter().filter(|a| a.is_readable()) {
            match attribute.query_value(module) {
                Ok(request) => {
                    scope.push_labeled(attribute.name(), request);
                }
                Err(error) => return self.engine.fail(error),
            }
        }
        scope.finish()
    }
}

impl<E: Engine> Dispatch for Pace<E> {
    type Reply<T: AttrValue> = E::Reply<T>;

    fn dispatch<T: AttrValue>(&self, request: PaceResult<Request<T>>) -> E::Reply<T> {
        match request {
            Ok(request) => self.engine.execute(request),
            Err(error) => self.engine.fail(error),
        }
    }

    fn module_ids(&self) -> &[u8] {
        &self.modules
    }
}

impl<E: Engine> fmt::Debug for Pace<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pace")
            .field("kind", &E::KIND)
            .field("modules", &self.modules)
            .field("max_line", &self.max_line)
            .finish()
    }
}

/// Open batching scope of a device.
///
/// Attribute calls made through the scope are queued and return a
/// [`Slot`]; [`BatchScope::finish`] issues them and yields the [`Replies`].
/// Dropping the scope without finishing discards the queued requests.
///
/// The scope handle is the only way to join the batch. Calls made directly
/// on the [`Pace`] (or its modules) while a scope is open are not queued;
/// they execute immediately as usual.
/// Calls made directly on the device while a scope is open execute
/// immediately.
pub struct BatchScope<'a, E: Engine> {
    device: &'a Pace<E>,
    batch: Mutex<Batch>,
}

impl<'a, E: Engine> BatchScope<'a, E> {
    pub fn push<T: AttrValue>(&self, request: Request<T>) -> Slot<T> {
        self.batch.lock().push(request)
    }

    pub fn push_labeled<T: AttrValue>(&self, label: impl Into<String>, request: Request<T>) -> Slot<T> {
        self.batch.lock().push_labeled(label, request)
    }

    pub fn len(&self) -> usize {
        self.batch.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.lock().is_empty()
    }

    /// Lines the batch would issue right now.
    pub fn lines(&self) -> Vec<String> {
        self.batch.lock().lines()
    }

    /// Issue the batch and close the scope.
    pub fn finish(self) -> E::Reply<Replies> {
        let batch = std::mem::replace(&mut *self.batch.lock(), Batch::new(self.device.max_line));
        self.device.engine.flush(batch)
    }
}

impl<E: Engine> Dispatch for BatchScope<'_, E> {
    type Reply<T: AttrValue> = PaceResult<Slot<T>>;

    fn dispatch<T: AttrValue>(&self, request: PaceResult<Request<T>>) -> PaceResult<Slot<T>> {
        request.map(|request| self.push(request))
    }

    fn module_ids(&self) -> &[u8] {
        self.device.module_ids()
    }
}

impl<E: Engine> Drop for BatchScope<'_, E> {
    fn drop(&mut self) {
        self.device.batch_open.store(false, Ordering::SeqCst);
    }
}
