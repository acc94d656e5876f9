//! The CLIPBOARD selection server.
//!
//! Ownership is acquired with a server timestamp per ICCCM, then a
//! single-threaded event loop answers `SelectionRequest`s until ownership is
//! lost and all pending work has drained. Each requestor window gets a FIFO
//! of requests with at most one transfer in flight; transfers larger than
//! the server's request ceiling run through the INCR protocol, driven by
//! `PropertyNotify(Delete)` events from the requestor. `MULTIPLE` requests
//! expand into sub-requests prepended to the same queue.

use std::{
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use arrayvec::ArrayVec;
use log::{debug, info, trace, warn};
use x11rb::{
    atom_manager,
    connection::{Connection, RequestConnection},
    errors::ReplyError,
    protocol::{
        xproto::{
            Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt, CreateWindowAux, EventMask,
            GetPropertyType, PropMode, Property, SelectionNotifyEvent, SelectionRequestEvent,
            Timestamp, Window, WindowClass, SELECTION_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as WrapperConnExt,
};
use xclipp_core::{
    text::{is_icccm_string, is_icccm_utf8_string},
    uri::{to_file_manager_clipboard_format, to_uri},
};

use crate::{CliError, X11Err};

atom_manager! {
    Atoms:
    AtomsCookie {
        CLIPBOARD,
        ATOM_PAIR,
        INCR,
        TIMESTAMP,
        TARGETS,
        MULTIPLE,
    }
}

const FILE_TARGETS: [&str; 6] = [
    "FILE_NAME",
    "text/uri-list",
    "x-special/gnome-copied-files",
    "x-special/KDE-copied-files",
    "x-special/mate-copied-files",
    "x-special/nautilus-clipboard",
];

/// An ATOM_PAIR entry: two 32-bit atoms.
const PAIR_BYTES: usize = 8;

#[derive(Copy, Clone, Debug)]
enum Handler {
    Timestamp,
    Targets,
    Multiple,
    /// The payload as-is, typed as the requested target.
    TextAsIs,
    /// TEXT, resolved to the best concrete encoding at startup.
    Text { type_atom: Atom },
    /// The canonical path, typed as a null-terminated C string.
    FileName { type_atom: Atom },
    UriList,
    CopiedFiles,
}

#[derive(Clone, Debug)]
struct Converted {
    type_: Atom,
    format: u8,
    bytes: Bytes,
}

#[derive(Clone, Debug)]
enum Bytes {
    /// Computed conversion; the cache hands out clones of the `Rc`.
    Owned(Rc<[u8]>),
    /// A MULTIPLE write-back buffer, mutated as sub-requests complete.
    PairList(Vec<u8>),
    /// Zero-copy view of the startup payload.
    Payload,
}

struct TransferState {
    data: Converted,
    /// `None` until the first property write goes out.
    transferred: Option<usize>,
}

/// Where a sub-request reports its outcome: the parent MULTIPLE's pair-list
/// property and the index of the pair within it.
#[derive(Copy, Clone, Debug)]
struct PairSlot {
    list_property: Atom,
    index: usize,
}

struct Request {
    id: u64,
    event: SelectionRequestEvent,
    ready: bool,
    on_finish: Option<PairSlot>,
}

enum Step {
    Done { notify: bool },
    NotDone,
    Fatal,
}

pub struct Clipper {
    conn: RustConnection,
    payload: Box<[u8]>,
    owner: Window,
    timestamp: Timestamp,
    atoms: Atoms,
    max_transfer_size: usize,
    handlers: HashMap<Atom, Handler>,
    queues: HashMap<Window, VecDeque<Request>>,
    transfers: HashMap<(Window, Atom), TransferState>,
    cache: HashMap<Atom, Converted>,
    next_request_id: u64,
}

impl Clipper {
    pub fn new(payload: Box<[u8]>, is_file: bool) -> Result<Self, CliError> {
        let (conn, screen_num) = x11rb::connect(None)?;
        conn.prefetch_maximum_request_bytes();
        let root = conn.setup().roots[screen_num].root;
        debug!("X11 connection established.");

        let owner = conn.generate_id()?;
        let create_cookie = conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            owner,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::default().event_mask(EventMask::PROPERTY_CHANGE),
        )?;

        let atoms_cookie = Atoms::new(&conn)?;

        let mut candidates = ArrayVec::<&str, 10>::new();
        candidates.push("TEXT");
        candidates.push("C_STRING");
        if is_icccm_string(&payload) {
            candidates.push("STRING");
        }
        if is_icccm_utf8_string(&payload) {
            candidates.push("UTF8_STRING");
        }
        if is_file {
            candidates.try_extend_from_slice(&FILE_TARGETS).unwrap();
        }
        let mut target_cookies = ArrayVec::<_, 10>::new();
        for name in candidates {
            target_cookies.push((name, conn.intern_atom(false, name.as_bytes())?));
        }

        // A zero-length write to a dummy property; the PropertyNotify it
        // triggers carries the server timestamp SetSelectionOwner needs.
        let time_cookie = conn.change_property8(
            PropMode::REPLACE,
            owner,
            AtomEnum::PRIMARY,
            AtomEnum::PRIMARY,
            &[],
        )?;
        conn.flush()?;

        create_cookie
            .check()
            .map_x11_err("failed to create owner window")?;
        let atoms = atoms_cookie
            .reply()
            .map_x11_err("failed to intern protocol atoms")?;
        let mut targets = HashMap::new();
        for (name, cookie) in target_cookies {
            match cookie.reply() {
                Ok(reply) => {
                    targets.insert(name, reply.atom);
                }
                Err(e) => warn!("Failed to intern {name} atom, dropping the target: {e}"),
            }
        }
        debug!("Atom internment complete.");

        time_cookie
            .check()
            .map_x11_err("failed to trigger the timestamp property change")?;
        let timestamp = loop {
            match conn.wait_for_event()? {
                Event::PropertyNotify(event) if event.window == owner => break event.time,
                event => trace!("Discarding startup event: {event:?}"),
            }
        };

        conn.set_selection_owner(owner, atoms.CLIPBOARD, timestamp)?
            .check()
            .map_x11_err("failed to acquire the CLIPBOARD selection")?;
        info!("Acquired CLIPBOARD selection ownership at server time {timestamp}.");

        // Half the maximum request size is usable for property data.
        let max_transfer_size = conn.maximum_request_bytes() / 2;

        let mut clipper = Self {
            conn,
            payload,
            owner,
            timestamp,
            atoms,
            max_transfer_size,
            handlers: HashMap::new(),
            queues: HashMap::new(),
            transfers: HashMap::new(),
            cache: HashMap::new(),
            next_request_id: 0,
        };
        clipper.register_handlers(&targets, is_file);
        Ok(clipper)
    }

    fn register_handlers(&mut self, targets: &HashMap<&str, Atom>, is_file: bool) {
        self.handlers.insert(self.atoms.TIMESTAMP, Handler::Timestamp);
        self.handlers.insert(self.atoms.TARGETS, Handler::Targets);
        self.handlers.insert(self.atoms.MULTIPLE, Handler::Multiple);

        let c_string = targets.get("C_STRING").copied();
        let string = targets.get("STRING").copied();
        let utf8_string = targets.get("UTF8_STRING").copied();
        for atom in [c_string, string, utf8_string].into_iter().flatten() {
            self.handlers.insert(atom, Handler::TextAsIs);
        }
        let best_text = utf8_string.or(string).or(c_string);
        if let (Some(type_atom), Some(&text)) = (best_text, targets.get("TEXT")) {
            self.handlers.insert(text, Handler::Text { type_atom });
        }

        if is_file {
            if let (Some(type_atom), Some(&file_name)) = (c_string, targets.get("FILE_NAME")) {
                self.handlers
                    .insert(file_name, Handler::FileName { type_atom });
            }
            if let Some(&uri_list) = targets.get("text/uri-list") {
                self.handlers.insert(uri_list, Handler::UriList);
            }
            for name in &FILE_TARGETS[2..] {
                if let Some(&atom) = targets.get(name) {
                    self.handlers.insert(atom, Handler::CopiedFiles);
                }
            }
        }
        debug!("Registered {} conversion targets.", self.handlers.len());
    }

    pub fn run(mut self) -> Result<(), CliError> {
        let current_owner = self
            .conn
            .get_selection_owner(self.atoms.CLIPBOARD)?
            .reply()
            .map_x11_err("failed to query the CLIPBOARD selection owner")?
            .owner;
        if current_owner != self.owner {
            info!("Outraced by another client taking the selection, exiting.");
            return Ok(());
        }

        info!("Serving CLIPBOARD conversion requests.");
        let mut own = true;
        while own || !self.queues.is_empty() {
            let event = match self.conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    info!("X11 connection closed: {e}");
                    return Ok(());
                }
            };
            match event {
                Event::SelectionRequest(event) => {
                    debug!(
                        "Conversion request from {:#x} for target atom {}.",
                        event.requestor, event.target
                    );
                    self.next_request_id += 1;
                    self.queues
                        .entry(event.requestor)
                        .or_default()
                        .push_back(Request {
                            id: self.next_request_id,
                            event,
                            ready: true,
                            on_finish: None,
                        });
                }
                Event::SelectionClear(_) => {
                    info!("Lost selection ownership, draining pending requests.");
                    own = false;
                }
                Event::PropertyNotify(event) if event.state == Property::DELETE => {
                    if let Some(head) = self
                        .queues
                        .get_mut(&event.window)
                        .and_then(VecDeque::front_mut)
                    {
                        if head.event.property == event.atom {
                            head.ready = true;
                        }
                    }
                }
                Event::Error(e) => debug!("Stray X11 error event: {e:?}"),
                event => trace!("Ignoring event: {event:?}"),
            }

            self.advance_queues();
            self.queues.retain(|_, queue| !queue.is_empty());
        }
        info!("All requests drained, exiting.");
        Ok(())
    }

    /// Advances every queue whose head is ready until nothing further can
    /// make progress without another event. A completed request may expose
    /// the next one behind it, and a MULTIPLE expansion puts fresh
    /// sub-requests at the head, so a single pass is not enough.
    fn advance_queues(&mut self) {
        loop {
            let ready: Vec<Window> = self
                .queues
                .iter()
                .filter(|(_, queue)| queue.front().is_some_and(|head| head.ready))
                .map(|(&window, _)| window)
                .collect();
            if ready.is_empty() {
                break;
            }
            for window in ready {
                if self
                    .queues
                    .get(&window)
                    .and_then(VecDeque::front)
                    .is_some_and(|head| head.ready)
                {
                    self.process_head(window);
                }
            }
        }
    }

    fn process_head(&mut self, window: Window) {
        let Some(head) = self.queues.get(&window).and_then(VecDeque::front) else {
            return;
        };
        let event = head.event;

        let valid = event.owner == self.owner
            && event.selection == self.atoms.CLIPBOARD
            && (event.time >= self.timestamp || event.time == x11rb::CURRENT_TIME)
            && self.handlers.contains_key(&event.target);
        if !valid {
            debug!(
                "Rejecting conversion request from {:#x} for target atom {}.",
                event.requestor, event.target
            );
            self.set_head_property(window, x11rb::NONE);
            self.finish_request(window, true);
            return;
        }

        match self.handlers[&event.target] {
            Handler::Multiple => self.handle_multiple(window),
            handler => self.handle_conversion(window, handler),
        }
    }

    fn handle_conversion(&mut self, window: Window, handler: Handler) {
        {
            // Obsolete clients omit the property and expect the target to
            // be used in its place.
            let head = self.queues.get_mut(&window).unwrap().front_mut().unwrap();
            if head.event.property == x11rb::NONE {
                head.event.property = head.event.target;
            }
        }
        let head = self.queues[&window].front().unwrap();
        let (head_id, event) = (head.id, head.event);

        let key = (window, event.property);
        // A property already carrying a pending pair list cannot double as
        // the destination of another conversion.
        if matches!(
            self.transfers.get(&key),
            Some(TransferState {
                data: Converted {
                    bytes: Bytes::PairList(_),
                    ..
                },
                ..
            })
        ) {
            debug!(
                "Property {} on {:#x} holds an unfinished pair list, rejecting.",
                event.property, window
            );
            self.set_head_property(window, x11rb::NONE);
            self.finish_request(window, true);
            return;
        }
        if !self.transfers.contains_key(&key) {
            let data = self.convert(handler, &event);
            self.transfers.insert(
                key,
                TransferState {
                    data,
                    transferred: None,
                },
            );
        }
        if self.queues[&window].front().map(|head| head.id) == Some(head_id) {
            self.drive(window);
        }
    }

    fn handle_multiple(&mut self, window: Window) {
        let head = self.queues[&window].front().unwrap();
        let (head_id, event) = (head.id, head.event);

        // Unlike every other target, a missing property is a hard rejection.
        if event.property == x11rb::NONE {
            self.finish_request(window, true);
            return;
        }

        let key = (window, event.property);
        if !self.transfers.contains_key(&key) {
            let Some(list) = self.read_pair_list(&event) else {
                self.set_head_property(window, x11rb::NONE);
                self.finish_request(window, true);
                return;
            };
            let pairs = parse_pairs(&list);
            // The entry doubles as the write-back buffer and as the
            // loop-detection marker for pairs naming this same property.
            self.transfers.insert(
                key,
                TransferState {
                    data: Converted {
                        type_: self.atoms.ATOM_PAIR,
                        format: 32,
                        bytes: Bytes::PairList(list),
                    },
                    transferred: None,
                },
            );

            let mut subs = Vec::with_capacity(pairs.len());
            for (index, &(target, property)) in pairs.iter().enumerate() {
                if property == x11rb::NONE {
                    continue;
                }
                if target == event.target && self.transfers.contains_key(&(window, property)) {
                    debug!(
                        "Refusing looping MULTIPLE pair (target {target}, property {property})."
                    );
                    self.reject_pair(window, event.property, index);
                    continue;
                }
                let mut sub_event = event;
                sub_event.target = target;
                sub_event.property = property;
                self.next_request_id += 1;
                subs.push(Request {
                    id: self.next_request_id,
                    event: sub_event,
                    ready: true,
                    on_finish: Some(PairSlot {
                        list_property: event.property,
                        index,
                    }),
                });
            }
            debug!(
                "Expanded MULTIPLE from {:#x} into {} sub-requests.",
                window,
                subs.len()
            );
            let queue = self.queues.get_mut(&window).unwrap();
            for sub in subs.into_iter().rev() {
                queue.push_front(sub);
            }
        }

        // Sub-requests run first; the pair list is written back once this
        // request reaches the head again.
        if self.queues[&window].front().map(|head| head.id) == Some(head_id) {
            self.drive(window);
        }
    }

    /// Reads and validates the requestor's ATOM_PAIR list. `None` rejects
    /// the MULTIPLE as a whole.
    fn read_pair_list(&self, event: &SelectionRequestEvent) -> Option<Vec<u8>> {
        let probe = self
            .conn
            .get_property(
                false,
                event.requestor,
                event.property,
                GetPropertyType::ANY,
                0,
                0,
            )
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.reply());
        let probe = match probe {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to probe the MULTIPLE pair list: {e}");
                return None;
            }
        };
        let size = probe.bytes_after as usize;
        if !pair_list_shape_ok(probe.format, probe.type_, self.atoms.ATOM_PAIR, size) {
            debug!(
                "Malformed MULTIPLE pair list (format {}, type {}, {size} bytes).",
                probe.format, probe.type_
            );
            return None;
        }

        let reply = self
            .conn
            .get_property(
                false,
                event.requestor,
                event.property,
                probe.type_,
                0,
                (size / 4) as u32,
            )
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.reply());
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to read the MULTIPLE pair list: {e}");
                return None;
            }
        };
        if reply.value.len() % PAIR_BYTES != 0 {
            debug!("MULTIPLE pair list changed size mid-read.");
            return None;
        }
        Some(reply.value)
    }

    fn convert(&mut self, handler: Handler, event: &SelectionRequestEvent) -> Converted {
        let target = event.target;
        match handler {
            Handler::Timestamp => Converted {
                type_: Atom::from(AtomEnum::INTEGER),
                format: 32,
                bytes: Bytes::Owned(Rc::from(self.timestamp.to_ne_bytes().to_vec())),
            },
            Handler::Targets => self.cached(target, |this| Converted {
                type_: Atom::from(AtomEnum::ATOM),
                format: 32,
                bytes: Bytes::Owned(Rc::from(target_list_bytes(&this.handlers))),
            }),
            Handler::TextAsIs => Converted {
                type_: target,
                format: 8,
                bytes: Bytes::Payload,
            },
            Handler::Text { type_atom } | Handler::FileName { type_atom } => Converted {
                type_: type_atom,
                format: 8,
                bytes: Bytes::Payload,
            },
            Handler::UriList => self.cached(target, |this| Converted {
                type_: target,
                format: 8,
                bytes: Bytes::Owned(Rc::from(to_uri(&this.payload))),
            }),
            Handler::CopiedFiles => self.cached(target, |this| Converted {
                type_: target,
                format: 8,
                bytes: Bytes::Owned(Rc::from(to_file_manager_clipboard_format(&this.payload))),
            }),
            Handler::Multiple => unreachable!(),
        }
    }

    /// Conversions that are stable for the lifetime of ownership are
    /// produced once and served from the cache thereafter.
    fn cached(&mut self, target: Atom, produce: impl FnOnce(&Self) -> Converted) -> Converted {
        if !self.cache.contains_key(&target) {
            let data = produce(self);
            self.cache.insert(target, data);
        }
        self.cache.get(&target).unwrap().clone()
    }

    /// One transfer step for the head request; bookkeeping of the outcome.
    fn drive(&mut self, window: Window) {
        let event = self.queues[&window].front().unwrap().event;
        let key = (window, event.property);
        match self.transfer_step(&event) {
            Step::Fatal => {
                self.transfers.remove(&key);
                self.set_head_property(window, x11rb::NONE);
                self.finish_request(window, false);
            }
            Step::Done { notify } => {
                self.transfers.remove(&key);
                self.finish_request(window, notify);
            }
            Step::NotDone => {
                self.queues.get_mut(&window).unwrap().front_mut().unwrap().ready = false;
            }
        }
    }

    fn transfer_step(&mut self, event: &SelectionRequestEvent) -> Step {
        let key = (event.requestor, event.property);
        let state = self.transfers.get(&key).unwrap();
        let transferred = state.transferred;
        let data = state.data.clone();
        let (type_, format) = (data.type_, data.format);
        let bytes: &[u8] = match &data.bytes {
            Bytes::Owned(bytes) => bytes,
            Bytes::PairList(list) => list,
            Bytes::Payload => &self.payload,
        };
        let size = bytes.len();

        let Some(transferred) = transferred else {
            if size <= self.max_transfer_size {
                let write = self
                    .conn
                    .change_property(
                        PropMode::REPLACE,
                        event.requestor,
                        event.property,
                        type_,
                        format,
                        element_count(size, format),
                        bytes,
                    )
                    .map_err(ReplyError::from)
                    .and_then(|cookie| cookie.check());
                if let Err(e) = write {
                    warn!("Failed to write property on {:#x}: {e}", event.requestor);
                    return Step::Fatal;
                }
                self.transfers.get_mut(&key).unwrap().transferred = Some(size);
                return Step::Done { notify: true };
            }

            // Too big for one request: announce an INCR transfer and watch
            // the requestor's property deletions for pacing.
            let subscribe = self.conn.change_window_attributes(
                event.requestor,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
            );
            let size_hint = u32::try_from(size).unwrap_or(u32::MAX);
            let announce = self.conn.change_property32(
                PropMode::REPLACE,
                event.requestor,
                event.property,
                self.atoms.INCR,
                &[size_hint],
            );
            if let Err(e) = subscribe
                .map_err(ReplyError::from)
                .and_then(|cookie| cookie.check())
            {
                warn!(
                    "Failed to subscribe to property changes on {:#x}: {e}",
                    event.requestor
                );
                return Step::Fatal;
            }
            if let Err(e) = announce
                .map_err(ReplyError::from)
                .and_then(|cookie| cookie.check())
            {
                warn!("Failed to write property on {:#x}: {e}", event.requestor);
                return Step::Fatal;
            }
            if !self.send_notify(event) {
                return Step::Fatal;
            }
            self.transfers.get_mut(&key).unwrap().transferred = Some(0);
            debug!("Started INCR transfer of {size} bytes to {:#x}.", event.requestor);
            return Step::NotDone;
        };

        // Next chunk; the transfer ends with a zero-length write.
        let chunk = chunk_len(size - transferred, self.max_transfer_size, format);
        let write = self
            .conn
            .change_property(
                PropMode::REPLACE,
                event.requestor,
                event.property,
                type_,
                format,
                element_count(chunk, format),
                &bytes[transferred..transferred + chunk],
            )
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.check());
        if let Err(e) = write {
            warn!("Failed to write INCR chunk to {:#x}: {e}", event.requestor);
            return Step::Fatal;
        }
        self.transfers.get_mut(&key).unwrap().transferred = Some(transferred + chunk);

        if transferred < size {
            return Step::NotDone;
        }

        // The final empty chunk went out; stop watching the requestor.
        let unsubscribe = self
            .conn
            .change_window_attributes(
                event.requestor,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
            )
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.check());
        if let Err(e) = unsubscribe {
            warn!(
                "Failed to unsubscribe from property changes on {:#x}: {e}",
                event.requestor
            );
        }
        debug!("Completed INCR transfer to {:#x}.", event.requestor);
        Step::Done { notify: false }
    }

    /// Pops the head request. A MULTIPLE sub-request reports its outcome
    /// into the parent's pair list instead of notifying the requestor.
    fn finish_request(&mut self, window: Window, send_notification: bool) {
        let request = self.queues.get_mut(&window).unwrap().pop_front().unwrap();
        if let Some(PairSlot {
            list_property,
            index,
        }) = request.on_finish
        {
            if request.event.property == x11rb::NONE {
                self.reject_pair(window, list_property, index);
            }
        } else if send_notification {
            self.send_notify(&request.event);
        }
    }

    fn send_notify(&self, event: &SelectionRequestEvent) -> bool {
        let notify = SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: event.time,
            requestor: event.requestor,
            selection: event.selection,
            target: event.target,
            property: event.property,
        };
        let result = self
            .conn
            .send_event(false, event.requestor, EventMask::NO_EVENT, notify)
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.check());
        if let Err(e) = result {
            warn!(
                "Failed to send completion notification to {:#x}: {e}",
                event.requestor
            );
            false
        } else {
            true
        }
    }

    fn set_head_property(&mut self, window: Window, property: Atom) {
        if let Some(head) = self.queues.get_mut(&window).and_then(VecDeque::front_mut) {
            head.event.property = property;
        }
    }

    /// Marks the property slot of the given pair as refused in the parent
    /// MULTIPLE's write-back buffer.
    fn reject_pair(&mut self, window: Window, list_property: Atom, index: usize) {
        if let Some(state) = self.transfers.get_mut(&(window, list_property)) {
            if let Bytes::PairList(list) = &mut state.data.bytes {
                clear_pair_property(list, index);
            }
        }
    }
}

fn pair_list_shape_ok(format: u8, type_: Atom, atom_pair: Atom, size: usize) -> bool {
    format == 32 && type_ == atom_pair && size % PAIR_BYTES == 0
}

fn parse_pairs(list: &[u8]) -> Vec<(Atom, Atom)> {
    list.chunks_exact(PAIR_BYTES)
        .map(|pair| {
            (
                Atom::from_ne_bytes(pair[..4].try_into().unwrap()),
                Atom::from_ne_bytes(pair[4..].try_into().unwrap()),
            )
        })
        .collect()
}

fn clear_pair_property(list: &mut [u8], index: usize) {
    let offset = index * PAIR_BYTES + 4;
    list[offset..offset + 4].copy_from_slice(&x11rb::NONE.to_ne_bytes());
}

fn atom_bytes(atoms: &[Atom]) -> Vec<u8> {
    atoms.iter().flat_map(|atom| atom.to_ne_bytes()).collect()
}

fn target_list_bytes(handlers: &HashMap<Atom, Handler>) -> Vec<u8> {
    let mut atoms: Vec<Atom> = handlers.keys().copied().collect();
    atoms.sort_unstable();
    atom_bytes(&atoms)
}

fn element_count(bytes: usize, format: u8) -> u32 {
    (8 * bytes / usize::from(format)) as u32
}

/// Caps a chunk at the transfer ceiling without splitting an element.
fn chunk_len(remaining: usize, max: usize, format: u8) -> usize {
    let chunk = remaining.min(max);
    chunk - chunk % usize::from(format / 8)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{
        atom_bytes, chunk_len, clear_pair_property, element_count, pair_list_shape_ok,
        parse_pairs, target_list_bytes, Handler,
    };

    #[test]
    fn chunks_cap_at_transfer_ceiling() {
        assert_eq!(chunk_len(500_000, 65_536, 8), 65_536);
        assert_eq!(chunk_len(100, 65_536, 8), 100);
        assert_eq!(chunk_len(0, 65_536, 8), 0);
    }

    #[test]
    fn chunks_never_split_elements() {
        assert_eq!(chunk_len(10, 7, 32), 4);
        assert_eq!(chunk_len(10, 7, 16), 6);
        assert_eq!(chunk_len(10, 7, 8), 7);
        assert_eq!(element_count(12, 32), 3);
        assert_eq!(element_count(12, 8), 12);
    }

    #[test]
    fn pair_list_shape() {
        let atom_pair = 42;
        assert!(pair_list_shape_ok(32, atom_pair, atom_pair, 16));
        assert!(pair_list_shape_ok(32, atom_pair, atom_pair, 0));
        assert!(!pair_list_shape_ok(8, atom_pair, atom_pair, 16));
        assert!(!pair_list_shape_ok(32, 7, atom_pair, 16));
        assert!(!pair_list_shape_ok(32, atom_pair, atom_pair, 12));
    }

    #[test]
    fn pairs_parse_in_order() {
        let list = atom_bytes(&[1, 2, 3, 4]);
        assert_eq!(parse_pairs(&list), vec![(1, 2), (3, 4)]);
        assert_eq!(parse_pairs(&[]), vec![]);
    }

    #[test]
    fn rejected_pair_clears_only_its_property_slot() {
        let mut list = atom_bytes(&[1, 2, 3, 4, 5, 6]);
        clear_pair_property(&mut list, 1);
        assert_eq!(parse_pairs(&list), vec![(1, 2), (3, 0), (5, 6)]);
        clear_pair_property(&mut list, 0);
        assert_eq!(parse_pairs(&list), vec![(1, 0), (3, 0), (5, 6)]);
    }

    #[test]
    fn target_list_is_sorted_ascending() {
        let handlers = HashMap::from([
            (17, Handler::Targets),
            (3, Handler::Timestamp),
            (29, Handler::Multiple),
            (5, Handler::TextAsIs),
        ]);
        assert_eq!(target_list_bytes(&handlers), atom_bytes(&[3, 5, 17, 29]));
        // Stable across invocations.
        assert_eq!(target_list_bytes(&handlers), target_list_bytes(&handlers));
    }
}
