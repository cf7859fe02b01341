// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server (slave) role (§4.5): a map of unit id → [`Model`], dispatched
//! per received frame by unit, then by function code.
//!
//! Model callbacks are plain `Future`-returning closures: the source this
//! crate is grounded on accepted callbacks that returned either a value or
//! a deferred value, but a single "future of T" shape is simpler to dispatch
//! and is what every caller ends up needing anyway (§9 "Callbacks that may
//! be sync or async").

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    pin::Pin,
    sync::Arc,
};

use futures_util::future::join_all;

use crate::{
    frame::{Address, Coil, Exception, ExceptionResponse, FunctionCode, Quantity, Request, Response, Word},
    slave::SlaveId,
    util::{in_range, AddressRanges},
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type CallbackResult<T> = std::result::Result<T, Exception>;

type ReadCoilsFn = Arc<dyn Fn(Address, Quantity) -> BoxFuture<CallbackResult<Vec<Coil>>> + Send + Sync>;
type ReadRegistersFn = Arc<dyn Fn(Address, Quantity) -> BoxFuture<CallbackResult<Vec<Word>>> + Send + Sync>;
type WriteSingleCoilFn = Arc<dyn Fn(Address, Coil) -> BoxFuture<CallbackResult<()>> + Send + Sync>;
type WriteSingleRegisterFn = Arc<dyn Fn(Address, Word) -> BoxFuture<CallbackResult<()>> + Send + Sync>;
type WriteMultipleCoilsFn =
    Arc<dyn Fn(Address, Vec<Coil>) -> BoxFuture<CallbackResult<()>> + Send + Sync>;
type WriteMultipleRegistersFn =
    Arc<dyn Fn(Address, Vec<Word>) -> BoxFuture<CallbackResult<()>> + Send + Sync>;
type ReportServerIdFn = Arc<dyn Fn() -> BoxFuture<CallbackResult<(u8, bool, Vec<u8>)>> + Send + Sync>;
type MaskWriteRegisterFn =
    Arc<dyn Fn(Address, u16, u16) -> BoxFuture<CallbackResult<()>> + Send + Sync>;
type ReadDeviceIdentificationFn =
    Arc<dyn Fn() -> BoxFuture<CallbackResult<BTreeMap<u8, Vec<u8>>>> + Send + Sync>;
/// Inspects a raw `(function code, PDU payload)` pair before the normal
/// per-FC dispatch runs. Kept synchronous: it is meant for cheap,
/// low-level interposing (logging, a handful of custom function codes),
/// not for driving I/O.
type InterceptorFn =
    Arc<dyn Fn(FunctionCode, &[u8]) -> Option<CallbackResult<Vec<u8>>> + Send + Sync>;

/// One logical Modbus server device: a unit address plus the optional
/// per-function-code callbacks it implements. Callbacks absent here make
/// the corresponding function code respond `ILLEGAL_FUNCTION` — unless a
/// documented fallback path (§4.5) covers it from simpler callbacks.
#[derive(Clone)]
pub struct Model {
    unit: SlaveId,
    read_coils: Option<ReadCoilsFn>,
    read_discrete_inputs: Option<ReadCoilsFn>,
    read_holding_registers: Option<ReadRegistersFn>,
    read_input_registers: Option<ReadRegistersFn>,
    write_single_coil: Option<WriteSingleCoilFn>,
    write_single_register: Option<WriteSingleRegisterFn>,
    write_multiple_coils: Option<WriteMultipleCoilsFn>,
    write_multiple_registers: Option<WriteMultipleRegistersFn>,
    report_server_id: Option<ReportServerIdFn>,
    mask_write_register: Option<MaskWriteRegisterFn>,
    read_device_identification: Option<ReadDeviceIdentificationFn>,
    interceptor: Option<InterceptorFn>,
    coils_range: Option<AddressRanges>,
    discrete_inputs_range: Option<AddressRanges>,
    input_registers_range: Option<AddressRanges>,
    holding_registers_range: Option<AddressRanges>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("unit", &self.unit).finish_non_exhaustive()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self {
            unit: 1,
            read_coils: None,
            read_discrete_inputs: None,
            read_holding_registers: None,
            read_input_registers: None,
            write_single_coil: None,
            write_single_register: None,
            write_multiple_coils: None,
            write_multiple_registers: None,
            report_server_id: None,
            mask_write_register: None,
            read_device_identification: None,
            interceptor: None,
            coils_range: None,
            discrete_inputs_range: None,
            input_registers_range: None,
            holding_registers_range: None,
        }
    }
}

impl Model {
    #[must_use]
    pub fn new(unit: SlaveId) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_read_coils<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<Vec<Coil>>> + Send + 'static,
    {
        self.read_coils = Some(Arc::new(move |a, q| Box::pin(f(a, q))));
        self
    }

    #[must_use]
    pub fn with_read_discrete_inputs<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<Vec<Coil>>> + Send + 'static,
    {
        self.read_discrete_inputs = Some(Arc::new(move |a, q| Box::pin(f(a, q))));
        self
    }

    #[must_use]
    pub fn with_read_holding_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<Vec<Word>>> + Send + 'static,
    {
        self.read_holding_registers = Some(Arc::new(move |a, q| Box::pin(f(a, q))));
        self
    }

    #[must_use]
    pub fn with_read_input_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<Vec<Word>>> + Send + 'static,
    {
        self.read_input_registers = Some(Arc::new(move |a, q| Box::pin(f(a, q))));
        self
    }

    #[must_use]
    pub fn with_write_single_coil<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Coil) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<()>> + Send + 'static,
    {
        self.write_single_coil = Some(Arc::new(move |a, v| Box::pin(f(a, v))));
        self
    }

    #[must_use]
    pub fn with_write_single_register<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Word) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<()>> + Send + 'static,
    {
        self.write_single_register = Some(Arc::new(move |a, v| Box::pin(f(a, v))));
        self
    }

    #[must_use]
    pub fn with_write_multiple_coils<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Vec<Coil>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<()>> + Send + 'static,
    {
        self.write_multiple_coils = Some(Arc::new(move |a, v| Box::pin(f(a, v))));
        self
    }

    #[must_use]
    pub fn with_write_multiple_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, Vec<Word>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<()>> + Send + 'static,
    {
        self.write_multiple_registers = Some(Arc::new(move |a, v| Box::pin(f(a, v))));
        self
    }

    #[must_use]
    pub fn with_report_server_id<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<(u8, bool, Vec<u8>)>> + Send + 'static,
    {
        self.report_server_id = Some(Arc::new(move || Box::pin(f())));
        self
    }

    #[must_use]
    pub fn with_mask_write_register<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Address, u16, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<()>> + Send + 'static,
    {
        self.mask_write_register = Some(Arc::new(move |a, and, or| Box::pin(f(a, and, or))));
        self
    }

    #[must_use]
    pub fn with_read_device_identification<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<BTreeMap<u8, Vec<u8>>>> + Send + 'static,
    {
        self.read_device_identification = Some(Arc::new(move || Box::pin(f())));
        self
    }

    #[must_use]
    pub fn with_interceptor<F>(mut self, f: F) -> Self
    where
        F: Fn(FunctionCode, &[u8]) -> Option<CallbackResult<Vec<u8>>> + Send + Sync + 'static,
    {
        self.interceptor = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_coils_range(mut self, range: AddressRanges) -> Self {
        self.coils_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_discrete_inputs_range(mut self, range: AddressRanges) -> Self {
        self.discrete_inputs_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_input_registers_range(mut self, range: AddressRanges) -> Self {
        self.input_registers_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_holding_registers_range(mut self, range: AddressRanges) -> Self {
        self.holding_registers_range = Some(range);
        self
    }
}

/// Owns the unit → [`Model`] map and dispatches inbound frames to it
/// (§4.5). Transport-specific connection loops (see [`rtu`], [`ascii`],
/// [`tcp`]) decode a frame, call [`Server::dispatch`], and write back
/// whatever non-`None` payload it returns.
#[derive(Debug, Default)]
pub struct Server {
    models: HashMap<SlaveId, Model>,
}

impl Server {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, model: Model) {
        self.models.insert(model.unit, model);
    }

    pub fn remove(&mut self, unit: SlaveId) -> Option<Model> {
        self.models.remove(&unit)
    }

    /// Dispatch `request`, addressed to `unit`. Returns `None` for a
    /// broadcast (unit 0, every registered model still runs, but no reply
    /// is ever produced) or for an unregistered unit (silently ignored, per
    /// §4.5 step 1).
    pub async fn dispatch(
        &self,
        unit: SlaveId,
        request: &Request,
    ) -> Option<std::result::Result<Response, ExceptionResponse>> {
        if unit == 0 {
            let futures = self
                .models
                .values()
                .map(|model| handle(model, request));
            join_all(futures).await;
            return None;
        }
        let model = self.models.get(&unit)?;
        Some(handle(model, request).await)
    }
}

async fn handle(
    model: &Model,
    request: &Request,
) -> std::result::Result<Response, ExceptionResponse> {
    // `Disconnect` is a client-side sentinel (§3 "not a wire request") and is
    // never produced by decoding an inbound frame, so it never reaches here
    // in practice; guard anyway rather than panic on `function_code()`.
    if matches!(request, Request::Disconnect) {
        return Err(exception_response(0x00, Exception::IllegalFunction));
    }
    let function = request.function_code();
    if let Some(interceptor) = &model.interceptor {
        let pdu = request.encode();
        if let Some(result) = interceptor(function, &pdu[1..]) {
            return result
                .map(|payload| Response::Custom(function, payload))
                .map_err(|exception| exception_response(function, exception));
        }
    }
    dispatch_function(model, request)
        .await
        .map_err(|exception| exception_response(function, exception))
}

fn exception_response(function: FunctionCode, exception: Exception) -> ExceptionResponse {
    ExceptionResponse { function, exception }
}

fn check_range(ranges: Option<&AddressRanges>, addr: Address, quantity: Quantity) -> CallbackResult<()> {
    if in_range(ranges, addr, quantity) {
        Ok(())
    } else {
        Err(Exception::IllegalDataAddress)
    }
}

fn check_bounds(quantity: Quantity, min: Quantity, max: Quantity) -> CallbackResult<()> {
    if (min..=max).contains(&quantity) {
        Ok(())
    } else {
        Err(Exception::IllegalDataValue)
    }
}

async fn dispatch_function(model: &Model, request: &Request) -> CallbackResult<Response> {
    use Request::*;
    match *request {
        ReadCoils(addr, quantity) => {
            let cb = model.read_coils.as_ref().ok_or(Exception::IllegalFunction)?;
            check_bounds(quantity, 1, 2000)?;
            check_range(model.coils_range.as_ref(), addr, quantity)?;
            Ok(Response::ReadCoils(cb(addr, quantity).await?))
        }
        ReadDiscreteInputs(addr, quantity) => {
            let cb = model
                .read_discrete_inputs
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            check_bounds(quantity, 1, 2000)?;
            check_range(model.discrete_inputs_range.as_ref(), addr, quantity)?;
            Ok(Response::ReadDiscreteInputs(cb(addr, quantity).await?))
        }
        ReadHoldingRegisters(addr, quantity) => {
            let cb = model
                .read_holding_registers
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            check_bounds(quantity, 1, 125)?;
            check_range(model.holding_registers_range.as_ref(), addr, quantity)?;
            Ok(Response::ReadHoldingRegisters(cb(addr, quantity).await?))
        }
        ReadInputRegisters(addr, quantity) => {
            let cb = model
                .read_input_registers
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            check_bounds(quantity, 1, 125)?;
            check_range(model.input_registers_range.as_ref(), addr, quantity)?;
            Ok(Response::ReadInputRegisters(cb(addr, quantity).await?))
        }
        WriteSingleCoil(addr, value) => {
            let cb = model
                .write_single_coil
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            check_range(model.coils_range.as_ref(), addr, 1)?;
            cb(addr, value).await?;
            Ok(Response::WriteSingleCoil(addr, value))
        }
        WriteSingleRegister(addr, value) => {
            let cb = model
                .write_single_register
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            check_range(model.holding_registers_range.as_ref(), addr, 1)?;
            cb(addr, value).await?;
            Ok(Response::WriteSingleRegister(addr, value))
        }
        WriteMultipleCoils(addr, ref coils) => {
            if model.write_multiple_coils.is_none() && model.write_single_coil.is_none() {
                return Err(Exception::IllegalFunction);
            }
            let quantity = coils.len() as Quantity;
            check_bounds(quantity, 1, 1968)?;
            check_range(model.coils_range.as_ref(), addr, quantity)?;
            write_multiple_coils(model, addr, coils).await?;
            Ok(Response::WriteMultipleCoils(addr, quantity))
        }
        WriteMultipleRegisters(addr, ref words) => {
            if model.write_multiple_registers.is_none() && model.write_single_register.is_none() {
                return Err(Exception::IllegalFunction);
            }
            let quantity = words.len() as Quantity;
            check_bounds(quantity, 1, 123)?;
            check_range(model.holding_registers_range.as_ref(), addr, quantity)?;
            write_multiple_registers(model, addr, words).await?;
            Ok(Response::WriteMultipleRegisters(addr, quantity))
        }
        ReportServerId => {
            let cb = model
                .report_server_id
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            let (server_id, run_indicator, additional_data) = cb().await?;
            Ok(Response::ReportServerId {
                server_id,
                run_indicator,
                additional_data,
            })
        }
        MaskWriteRegister(addr, and_mask, or_mask) => {
            if model.mask_write_register.is_none()
                && (model.read_holding_registers.is_none() || model.write_single_register.is_none())
            {
                return Err(Exception::IllegalFunction);
            }
            check_range(model.holding_registers_range.as_ref(), addr, 1)?;
            mask_write_register(model, addr, and_mask, or_mask).await?;
            Ok(Response::MaskWriteRegister(addr, and_mask, or_mask))
        }
        ReadWriteMultipleRegisters(read_addr, read_quantity, write_addr, ref words) => {
            let read_cb = model
                .read_holding_registers
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            if model.write_multiple_registers.is_none() && model.write_single_register.is_none() {
                return Err(Exception::IllegalFunction);
            }
            check_bounds(read_quantity, 1, 125)?;
            check_bounds(words.len() as Quantity, 1, 121)?;
            check_range(model.holding_registers_range.as_ref(), read_addr, read_quantity)?;
            check_range(
                model.holding_registers_range.as_ref(),
                write_addr,
                words.len() as Quantity,
            )?;
            write_multiple_registers(model, write_addr, words).await?;
            Ok(Response::ReadWriteMultipleRegisters(
                read_cb(read_addr, read_quantity).await?,
            ))
        }
        ReadDeviceIdentification(read_device_id_code, object_id) => {
            let cb = model
                .read_device_identification
                .as_ref()
                .ok_or(Exception::IllegalFunction)?;
            let objects = cb().await?;
            read_device_identification(objects, read_device_id_code, object_id)
        }
        Custom(..) | Disconnect => Err(Exception::IllegalFunction),
    }
}

/// FC15/16 fallback (§4.5): if the multi-write callback is absent but the
/// single-write one is present, emulate by writing every element, possibly
/// concurrently; the first failure fails the whole operation.
async fn write_multiple_coils(model: &Model, addr: Address, coils: &[Coil]) -> CallbackResult<()> {
    if let Some(cb) = &model.write_multiple_coils {
        return cb(addr, coils.to_vec()).await;
    }
    let cb = model
        .write_single_coil
        .as_ref()
        .ok_or(Exception::IllegalFunction)?;
    let futures = coils
        .iter()
        .enumerate()
        .map(|(i, &coil)| cb(addr + i as Address, coil));
    for result in join_all(futures).await {
        result?;
    }
    Ok(())
}

async fn write_multiple_registers(
    model: &Model,
    addr: Address,
    words: &[Word],
) -> CallbackResult<()> {
    if let Some(cb) = &model.write_multiple_registers {
        return cb(addr, words.to_vec()).await;
    }
    let cb = model
        .write_single_register
        .as_ref()
        .ok_or(Exception::IllegalFunction)?;
    let futures = words
        .iter()
        .enumerate()
        .map(|(i, &word)| cb(addr + i as Address, word));
    for result in join_all(futures).await {
        result?;
    }
    Ok(())
}

/// FC22 fallback (§4.5): if `maskWriteRegister` is absent, emulate it from
/// a read-modify-write. Uses the full 16-bit inverted mask
/// (`orMask & (~andMask & 0xFFFF)`) — the source this crate is grounded on
/// truncates `~andMask` to 8 bits, a known bug (§9); this implementation
/// follows the specification instead.
async fn mask_write_register(
    model: &Model,
    addr: Address,
    and_mask: u16,
    or_mask: u16,
) -> CallbackResult<()> {
    if let Some(cb) = &model.mask_write_register {
        return cb(addr, and_mask, or_mask).await;
    }
    let read_cb = model
        .read_holding_registers
        .as_ref()
        .ok_or(Exception::IllegalFunction)?;
    let write_cb = model
        .write_single_register
        .as_ref()
        .ok_or(Exception::IllegalFunction)?;
    let current = *read_cb(addr, 1)
        .await?
        .first()
        .ok_or(Exception::ServerDeviceFailure)?;
    let new_value = (current & and_mask) | (or_mask & (!and_mask & 0xFFFF));
    write_cb(addr, new_value).await
}

const RESERVED_OBJECT_RANGE: std::ops::RangeInclusive<u8> = 0x07..=0x7F;

/// FC43/14 algorithm (§4.5): seed the mandatory null objects, validate the
/// requested (readCode, objectId) pair, then pack as many objects as fit a
/// single PDU, reporting a continuation point when they don't all fit.
fn read_device_identification(
    mut objects: BTreeMap<u8, Vec<u8>>,
    read_device_id_code: u8,
    mut object_id: u8,
) -> CallbackResult<Response> {
    for id in [0x00, 0x01, 0x02] {
        objects.entry(id).or_insert_with(|| b"null".to_vec());
    }

    let in_reserved_range = RESERVED_OBJECT_RANGE.contains(&object_id);
    match read_device_id_code {
        0x01 => {
            if !(0x00..=0x02).contains(&object_id) || in_reserved_range {
                object_id = 0x00;
            }
        }
        0x02 => {
            if object_id >= 0x80 || in_reserved_range {
                object_id = 0x00;
            }
        }
        0x03 => {
            if in_reserved_range {
                object_id = 0x00;
            }
        }
        0x04 => {
            if in_reserved_range {
                return Err(Exception::IllegalDataAddress);
            }
        }
        _ => return Err(Exception::IllegalDataValue),
    }

    if !objects.contains_key(&object_id) {
        if read_device_id_code == 0x04 {
            return Err(Exception::IllegalDataAddress);
        }
        object_id = 0x00;
    }

    let conformity_level = if objects.keys().any(|&id| id > 0x80) {
        0x83
    } else if objects.keys().any(|&id| (0x03..=0x80).contains(&id)) {
        0x82
    } else {
        0x81
    };

    const MBAP_OVERHEAD_BUDGET: usize = 10;
    const MAX_PDU_LEN: usize = 253;
    const MAX_OBJECT_LEN: usize = 245;

    let mut running_length = MBAP_OVERHEAD_BUDGET;
    let mut picked = Vec::new();
    let mut last_id = 0u8;
    for (&id, value) in objects.range(object_id..) {
        if value.len() > MAX_OBJECT_LEN {
            return Err(Exception::ServerDeviceFailure);
        }
        if value.len() + 2 > MAX_PDU_LEN.saturating_sub(running_length) {
            last_id = id;
            break;
        }
        running_length += value.len() + 2;
        picked.push((id, value.clone()));
        if read_device_id_code == 0x04 {
            break;
        }
    }

    Ok(Response::ReadDeviceIdentification(
        crate::frame::DeviceIdentification {
            read_device_id_code,
            conformity_level,
            more_follows: last_id != 0,
            next_object_id: last_id,
            objects: picked,
        },
    ))
}
