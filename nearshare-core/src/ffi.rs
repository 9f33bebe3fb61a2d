//! C ABI for linking nearshare-core as a static library from Android (NDK) or other C/C++ hosts.
//! The host supplies the connection broker as a transport vtable and the UI as an observer vtable;
//! broker callbacks are fed back through the `nearshare_core_on_*` functions.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::config::Config;
use crate::identity::{NeighborId, PayloadId};
use crate::observer::ConnectionObserver;
use crate::protocol::ApplicationMessage;
use crate::state::ConnectionState;
use crate::transport::{TransferStatus, Transport, TransportError, TransportEvent};
use crate::{ActionError, ShareCore};

pub const NEARSHARE_OK: c_int = 0;
pub const NEARSHARE_ERR_ARG: c_int = -1;
pub const NEARSHARE_ERR_REJECTED: c_int = -2;

pub const NEARSHARE_STATE_ISOLATED: c_int = 0;
pub const NEARSHARE_STATE_ADVERTISING: c_int = 1;
pub const NEARSHARE_STATE_DISCOVERING: c_int = 2;
pub const NEARSHARE_STATE_AUTHENTICATING: c_int = 3;
pub const NEARSHARE_STATE_CONNECTING: c_int = 4;
pub const NEARSHARE_STATE_READY_TO_SEND: c_int = 5;
pub const NEARSHARE_STATE_SENDING: c_int = 6;
pub const NEARSHARE_STATE_FAILURE: c_int = 7;

pub const NEARSHARE_MESSAGE_URL: c_int = 0;
pub const NEARSHARE_MESSAGE_PAGE: c_int = 1;

pub const NEARSHARE_TRANSFER_IN_PROGRESS: c_int = 0;
pub const NEARSHARE_TRANSFER_SUCCESS: c_int = 1;
pub const NEARSHARE_TRANSFER_FAILURE: c_int = 2;

/// Connection broker implemented by the host. Fallible calls return 0 on success.
/// Must not call back into the core from inside these functions.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NearShareTransportVTable {
    pub ctx: *mut c_void,
    pub advertise:
        extern "C" fn(ctx: *mut c_void, name: *const c_char, service_id: *const c_char) -> c_int,
    pub discover: extern "C" fn(ctx: *mut c_void, service_id: *const c_char) -> c_int,
    pub stop_advertising: extern "C" fn(ctx: *mut c_void),
    pub stop_discovery: extern "C" fn(ctx: *mut c_void),
    pub request_connection: extern "C" fn(ctx: *mut c_void, endpoint: *const c_char) -> c_int,
    pub accept_connection: extern "C" fn(ctx: *mut c_void, endpoint: *const c_char) -> c_int,
    pub reject_connection: extern "C" fn(ctx: *mut c_void, endpoint: *const c_char) -> c_int,
    /// Writes the broker's payload id to `out_payload_id`.
    pub send_payload: extern "C" fn(
        ctx: *mut c_void,
        endpoint: *const c_char,
        bytes: *const u8,
        len: usize,
        out_payload_id: *mut i64,
    ) -> c_int,
    pub disconnect_all: extern "C" fn(ctx: *mut c_void),
}

/// UI callbacks, run with the core locked: post to the UI thread, do not call back into the core.
/// Strings are only valid for the duration of the call; null when absent.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NearShareObserverVTable {
    pub ctx: *mut c_void,
    /// `detail` is the pairing token while authenticating and the message on failure.
    pub on_state_changed: extern "C" fn(
        ctx: *mut c_void,
        state: c_int,
        neighbor_id: *const c_char,
        neighbor_name: *const c_char,
        detail: *const c_char,
    ),
    pub on_message_received: extern "C" fn(
        ctx: *mut c_void,
        kind: c_int,
        body: *const u8,
        body_len: usize,
        from_id: *const c_char,
        from_name: *const c_char,
    ),
    pub on_message_delivered: extern "C" fn(ctx: *mut c_void, payload_id: i64),
    pub on_error: extern "C" fn(ctx: *mut c_void, message: *const c_char),
}

struct FfiTransport(NearShareTransportVTable);

// The host promises ctx may be used from any thread.
unsafe impl Send for FfiTransport {}
unsafe impl Sync for FfiTransport {}

fn endpoint_cstring(endpoint: &NeighborId) -> Result<CString, TransportError> {
    CString::new(endpoint.as_str()).map_err(|_| TransportError::UnknownEndpoint(endpoint.clone()))
}

fn service_cstring(service_id: &str) -> Result<CString, TransportError> {
    CString::new(service_id).map_err(|_| TransportError::Rejected("service id contains NUL".into()))
}

fn status_to_result(rc: c_int, what: &str) -> Result<(), TransportError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(TransportError::Rejected(format!("{what} returned {rc}")))
    }
}

impl Transport for FfiTransport {
    fn advertise(&self, name: &str, service_id: &str) -> Result<(), TransportError> {
        let name = CString::new(name)
            .map_err(|_| TransportError::Rejected("endpoint name contains NUL".into()))?;
        let service = service_cstring(service_id)?;
        status_to_result(
            (self.0.advertise)(self.0.ctx, name.as_ptr(), service.as_ptr()),
            "advertise",
        )
    }

    fn discover(&self, service_id: &str) -> Result<(), TransportError> {
        let service = service_cstring(service_id)?;
        status_to_result((self.0.discover)(self.0.ctx, service.as_ptr()), "discover")
    }

    fn stop_advertising(&self) {
        (self.0.stop_advertising)(self.0.ctx)
    }

    fn stop_discovery(&self) {
        (self.0.stop_discovery)(self.0.ctx)
    }

    fn request_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let id = endpoint_cstring(endpoint)?;
        status_to_result(
            (self.0.request_connection)(self.0.ctx, id.as_ptr()),
            "request_connection",
        )
    }

    fn accept_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let id = endpoint_cstring(endpoint)?;
        status_to_result(
            (self.0.accept_connection)(self.0.ctx, id.as_ptr()),
            "accept_connection",
        )
    }

    fn reject_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let id = endpoint_cstring(endpoint)?;
        status_to_result(
            (self.0.reject_connection)(self.0.ctx, id.as_ptr()),
            "reject_connection",
        )
    }

    fn send_payload(
        &self,
        endpoint: &NeighborId,
        bytes: Vec<u8>,
    ) -> Result<PayloadId, TransportError> {
        let id = endpoint_cstring(endpoint)?;
        let mut payload_id: i64 = 0;
        let rc = (self.0.send_payload)(
            self.0.ctx,
            id.as_ptr(),
            bytes.as_ptr(),
            bytes.len(),
            &mut payload_id,
        );
        status_to_result(rc, "send_payload")?;
        Ok(PayloadId(payload_id))
    }

    fn disconnect_all(&self) {
        (self.0.disconnect_all)(self.0.ctx)
    }
}

struct FfiObserver(NearShareObserverVTable);

unsafe impl Send for FfiObserver {}
unsafe impl Sync for FfiObserver {}

/// CString for the callback, dropping interior NULs rather than failing.
fn lossy_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
    s.as_ref().map_or(ptr::null(), |c| c.as_ptr())
}

impl ConnectionObserver for FfiObserver {
    fn on_state_changed(&self, state: &ConnectionState) {
        let id = state.neighbor_id().map(|id| lossy_cstring(id.as_str()));
        let name = state.neighbor_name().map(lossy_cstring);
        let detail = match state {
            ConnectionState::Authenticating { token, .. } => token.as_deref().map(lossy_cstring),
            ConnectionState::Failure { message } => Some(lossy_cstring(message)),
            _ => None,
        };
        (self.0.on_state_changed)(
            self.0.ctx,
            state_code(state),
            opt_ptr(&id),
            opt_ptr(&name),
            opt_ptr(&detail),
        );
    }

    fn on_message_received(
        &self,
        message: &ApplicationMessage,
        from: &NeighborId,
        from_name: Option<&str>,
    ) {
        let kind = match message {
            ApplicationMessage::Url(_) => NEARSHARE_MESSAGE_URL,
            ApplicationMessage::Page(_) => NEARSHARE_MESSAGE_PAGE,
        };
        let body = message.body().as_bytes();
        let from = lossy_cstring(from.as_str());
        let from_name = from_name.map(lossy_cstring);
        (self.0.on_message_received)(
            self.0.ctx,
            kind,
            body.as_ptr(),
            body.len(),
            from.as_ptr(),
            opt_ptr(&from_name),
        );
    }

    fn on_message_delivered(&self, payload_id: PayloadId) {
        (self.0.on_message_delivered)(self.0.ctx, payload_id.get())
    }

    fn on_error(&self, message: &str) {
        let message = lossy_cstring(message);
        (self.0.on_error)(self.0.ctx, message.as_ptr())
    }
}

/// Integer code for a state, as reported to C hosts.
pub fn state_code(state: &ConnectionState) -> c_int {
    match state {
        ConnectionState::Isolated => NEARSHARE_STATE_ISOLATED,
        ConnectionState::Advertising => NEARSHARE_STATE_ADVERTISING,
        ConnectionState::Discovering => NEARSHARE_STATE_DISCOVERING,
        ConnectionState::Authenticating { .. } => NEARSHARE_STATE_AUTHENTICATING,
        ConnectionState::Connecting { .. } => NEARSHARE_STATE_CONNECTING,
        ConnectionState::ReadyToSend { .. } => NEARSHARE_STATE_READY_TO_SEND,
        ConnectionState::Sending { .. } => NEARSHARE_STATE_SENDING,
        ConnectionState::Failure { .. } => NEARSHARE_STATE_FAILURE,
    }
}

/// Borrow a C string as UTF-8. None if null or not UTF-8.
unsafe fn str_arg<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

fn core_ref<'a>(h: *mut c_void) -> Option<&'a ShareCore> {
    if h.is_null() {
        return None;
    }
    Some(unsafe { &*(h as *const ShareCore) })
}

fn action_rc(result: Result<(), ActionError>) -> c_int {
    match result {
        Ok(()) => NEARSHARE_OK,
        Err(_) => NEARSHARE_ERR_REJECTED,
    }
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn nearshare_core_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Create a core instance. `endpoint_name` and `service_id` may be null for the defaults.
/// Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn nearshare_core_create(
    transport: *const NearShareTransportVTable,
    endpoint_name: *const c_char,
    service_id: *const c_char,
    authentication: c_int,
) -> *mut c_void {
    if transport.is_null() {
        return ptr::null_mut();
    }
    let vtable = unsafe { *transport };
    let mut config = Config::default();
    if !endpoint_name.is_null() {
        match unsafe { str_arg(endpoint_name) } {
            Some(name) => config.endpoint_name = name.to_string(),
            None => return ptr::null_mut(),
        }
    }
    if !service_id.is_null() {
        match unsafe { str_arg(service_id) } {
            Some(id) => config.service_id = id.to_string(),
            None => return ptr::null_mut(),
        }
    }
    config.authentication = authentication != 0;
    let core = ShareCore::new(Arc::new(FfiTransport(vtable)), &config);
    Box::into_raw(Box::new(core)) as *mut c_void
}

/// Destroy core instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn nearshare_core_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut ShareCore) };
}

/// Register UI callbacks; `on_state_changed` fires once immediately.
/// Returns observer id (>= 0), or -1 on error.
#[no_mangle]
pub extern "C" fn nearshare_core_register_observer(
    h: *mut c_void,
    observer: *const NearShareObserverVTable,
) -> i64 {
    let Some(core) = core_ref(h) else {
        return -1;
    };
    if observer.is_null() {
        return -1;
    }
    let vtable = unsafe { *observer };
    core.register_observer(Arc::new(FfiObserver(vtable))).0 as i64
}

/// Current state code, or -1 if h is null.
#[no_mangle]
pub extern "C" fn nearshare_core_state(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => state_code(&core.state()),
        None => NEARSHARE_ERR_ARG,
    }
}

#[no_mangle]
pub extern "C" fn nearshare_core_start_advertising(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => action_rc(core.start_advertising()),
        None => NEARSHARE_ERR_ARG,
    }
}

#[no_mangle]
pub extern "C" fn nearshare_core_start_discovering(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => action_rc(core.start_discovering()),
        None => NEARSHARE_ERR_ARG,
    }
}

#[no_mangle]
pub extern "C" fn nearshare_core_accept(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => action_rc(core.accept()),
        None => NEARSHARE_ERR_ARG,
    }
}

#[no_mangle]
pub extern "C" fn nearshare_core_reject(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => action_rc(core.reject()),
        None => NEARSHARE_ERR_ARG,
    }
}

#[no_mangle]
pub extern "C" fn nearshare_core_disconnect(h: *mut c_void) -> c_int {
    match core_ref(h) {
        Some(core) => {
            core.disconnect();
            NEARSHARE_OK
        }
        None => NEARSHARE_ERR_ARG,
    }
}

/// Send a URL (UTF-8, NUL-terminated). Writes the payload id on success.
#[no_mangle]
pub extern "C" fn nearshare_core_send_url(
    h: *mut c_void,
    url: *const c_char,
    out_payload_id: *mut i64,
) -> c_int {
    let Some(core) = core_ref(h) else {
        return NEARSHARE_ERR_ARG;
    };
    let Some(url) = (unsafe { str_arg(url) }) else {
        return NEARSHARE_ERR_ARG;
    };
    write_payload_id(core.send_url(url), out_payload_id)
}

/// Send serialized page HTML (`html_len` bytes of UTF-8). Writes the payload id on success.
#[no_mangle]
pub extern "C" fn nearshare_core_send_page(
    h: *mut c_void,
    html: *const u8,
    html_len: usize,
    out_payload_id: *mut i64,
) -> c_int {
    let Some(core) = core_ref(h) else {
        return NEARSHARE_ERR_ARG;
    };
    if html.is_null() {
        return NEARSHARE_ERR_ARG;
    }
    let bytes = unsafe { slice::from_raw_parts(html, html_len) };
    let Ok(html) = std::str::from_utf8(bytes) else {
        return NEARSHARE_ERR_ARG;
    };
    write_payload_id(core.send_page(html), out_payload_id)
}

fn write_payload_id(result: Result<PayloadId, ActionError>, out: *mut i64) -> c_int {
    match result {
        Ok(payload_id) => {
            if !out.is_null() {
                unsafe {
                    *out = payload_id.get();
                }
            }
            NEARSHARE_OK
        }
        Err(_) => NEARSHARE_ERR_REJECTED,
    }
}

/// Feed one event; shared argument checking for the `on_*` entry points.
fn feed(h: *mut c_void, event: Option<TransportEvent>) -> c_int {
    match (core_ref(h), event) {
        (Some(core), Some(event)) => {
            core.handle_event(event);
            NEARSHARE_OK
        }
        _ => NEARSHARE_ERR_ARG,
    }
}

fn neighbor_arg(p: *const c_char) -> Option<NeighborId> {
    unsafe { str_arg(p) }.map(NeighborId::new)
}

#[no_mangle]
pub extern "C" fn nearshare_core_on_endpoint_found(
    h: *mut c_void,
    endpoint: *const c_char,
    name: *const c_char,
) -> c_int {
    let event = neighbor_arg(endpoint).zip(unsafe { str_arg(name) }).map(|(id, name)| {
        TransportEvent::EndpointFound {
            id,
            name: name.to_string(),
        }
    });
    feed(h, event)
}

#[no_mangle]
pub extern "C" fn nearshare_core_on_endpoint_lost(h: *mut c_void, endpoint: *const c_char) -> c_int {
    feed(h, neighbor_arg(endpoint).map(|id| TransportEvent::EndpointLost { id }))
}

/// `token` may be null; if present it must be UTF-8.
#[no_mangle]
pub extern "C" fn nearshare_core_on_connection_initiated(
    h: *mut c_void,
    endpoint: *const c_char,
    name: *const c_char,
    token: *const c_char,
) -> c_int {
    let token = if token.is_null() {
        None
    } else {
        match unsafe { str_arg(token) } {
            Some(t) => Some(t.to_string()),
            None => return NEARSHARE_ERR_ARG,
        }
    };
    let event = neighbor_arg(endpoint).zip(unsafe { str_arg(name) }).map(|(id, name)| {
        TransportEvent::ConnectionInitiated {
            id,
            name: name.to_string(),
            token,
        }
    });
    feed(h, event)
}

#[no_mangle]
pub extern "C" fn nearshare_core_on_connection_result(
    h: *mut c_void,
    endpoint: *const c_char,
    success: c_int,
) -> c_int {
    let event = neighbor_arg(endpoint).map(|id| TransportEvent::ConnectionResult {
        id,
        success: success != 0,
    });
    feed(h, event)
}

#[no_mangle]
pub extern "C" fn nearshare_core_on_disconnected(h: *mut c_void, endpoint: *const c_char) -> c_int {
    feed(h, neighbor_arg(endpoint).map(|id| TransportEvent::Disconnected { id }))
}

/// `bytes` may be null only when `len` is 0.
#[no_mangle]
pub extern "C" fn nearshare_core_on_payload_received(
    h: *mut c_void,
    endpoint: *const c_char,
    bytes: *const u8,
    len: usize,
) -> c_int {
    if bytes.is_null() && len != 0 {
        return NEARSHARE_ERR_ARG;
    }
    let bytes = if len == 0 {
        Vec::new()
    } else {
        unsafe { slice::from_raw_parts(bytes, len).to_vec() }
    };
    feed(
        h,
        neighbor_arg(endpoint).map(|id| TransportEvent::PayloadReceived { id, bytes }),
    )
}

#[no_mangle]
pub extern "C" fn nearshare_core_on_payload_transfer_update(
    h: *mut c_void,
    payload_id: i64,
    status: c_int,
) -> c_int {
    let status = match status {
        NEARSHARE_TRANSFER_IN_PROGRESS => TransferStatus::InProgress,
        NEARSHARE_TRANSFER_SUCCESS => TransferStatus::Success,
        NEARSHARE_TRANSFER_FAILURE => TransferStatus::Failure,
        _ => return NEARSHARE_ERR_ARG,
    };
    feed(
        h,
        Some(TransportEvent::PayloadTransferUpdate {
            payload_id: PayloadId(payload_id),
            status,
        }),
    )
}
