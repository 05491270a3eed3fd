// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The scan engine: serializes scan requests against each radio's work
//! queue, arbitrates driver-originated scan activity against local
//! requests, fragments hidden-SSID probes across kernel commands, and runs
//! the periodic background scan with exponential back-off.

use crate::{
    bss::Bss,
    config::Config,
    freq_set::FreqSet,
    known_networks::KnownNetworks,
    radio::{Radio, WorkId, WorkPriority},
    timer::{Clock, EventId, MonotonicClock, TimeStream, TimedEvent, Timer},
    transport::{
        Attr, Band, Cmd, CmdId, Message, Transport, SCAN_FLAG_FLUSH, SCAN_FLAG_RANDOM_ADDR,
        SCAN_FLAG_RANDOM_SN,
    },
};
use log::{debug, error, info, warn};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{HashMap, VecDeque},
    rc::Rc,
    time::Duration,
};
use thiserror::Error;
use wlan_common::{channel::oper_class_to_frequency, ie::Id, mac::MacAddr};

/// Identifier of one logical scan request; doubles as the radio work-item
/// id. Zero is the invalid id returned when the device is unknown.
pub type ScanId = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ScanError {
    /// The driver is running another scan; the request will be retried.
    #[error("device is busy")]
    Busy,
    /// An externally requested scan flushed the accumulated results.
    #[error("results were flushed, try again")]
    TryAgain,
    /// The scan was aborted by the driver or canceled locally.
    #[error("scan was canceled")]
    Canceled,
    /// The dump produced no BSSes (firmware-scan path only).
    #[error("no scan results available")]
    NoResults,
    /// The transport refused the command.
    #[error("transport failure")]
    Io,
    /// Any other driver-reported errno.
    #[error("driver error {0}")]
    Driver(i32),
}

#[derive(Debug, PartialEq)]
pub struct ScanResults {
    /// Discovered BSSes, best rank first.
    pub bss_list: Vec<Bss>,
    /// Frequencies the driver reported scanning, when known.
    pub freqs: Option<FreqSet>,
}

/// Per-request callbacks. One handler object owns the whole request
/// lifecycle; its `Drop` impl is the destructor and runs exactly once, no
/// later than context teardown.
///
/// Handlers are invoked with the engine borrowed mutably and may re-enter
/// any engine API.
pub trait ScanHandler {
    /// Called once: with `Ok` when the first fragment is accepted by the
    /// driver, or with `Err` when the request fails before that. The
    /// default forwards failures to [`ScanHandler::on_done`].
    fn on_triggered(&mut self, engine: &mut ScanEngine, result: Result<(), ScanError>) {
        if let Err(e) = result {
            self.on_done(engine, Err(e));
        }
    }

    /// Called at most once with the final outcome. Ownership of the result
    /// list transfers to the handler.
    fn on_done(&mut self, engine: &mut ScanEngine, result: Result<ScanResults, ScanError>);
}

/// Callbacks for the periodic background scan.
pub trait PeriodicHandler {
    fn on_triggered(&mut self, _engine: &mut ScanEngine) {}

    /// Results of a periodic or externally triggered scan.
    fn on_results(&mut self, engine: &mut ScanEngine, result: Result<ScanResults, ScanError>);
}

/// Options of one logical scan, expanded into one or more driver commands.
#[derive(Clone, Debug, Default)]
pub struct ScanParameters {
    /// Restrict the scan to these frequencies.
    pub freqs: Option<FreqSet>,
    /// Probe for exactly this SSID instead of the hidden known networks.
    pub ssid: Option<Vec<u8>>,
    /// Ask the driver to drop cached results before this scan.
    pub flush: bool,
    /// Appended as the last element of the probe request.
    pub extra_ie: Vec<u8>,
    /// Randomize the source MAC if the radio can and config allows.
    pub randomize_mac_addr_hint: bool,
    /// Probe from this exact source MAC (full-ones mask).
    pub source_mac: Option<MacAddr>,
    /// Send probes at OFDM rates only.
    pub no_cck_rates: bool,
    /// Per-channel dwell time hint in TUs, if the radio supports it.
    pub duration: u16,
    pub duration_mandatory: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerEvent {
    PeriodicScan { wdev_id: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ScanState {
    NotRunning,
    Passive,
    Active,
}

struct ScanRequest {
    /// `None` once the request was canceled (results to be discarded) or
    /// while the handler is out on a callback frame.
    handler: Option<Box<dyn ScanHandler>>,
    canceled: bool,
    passive: bool,
    /// A trigger command of this request was accepted at least once.
    started: bool,
    periodic: bool,
    /// The head command was accepted and the scan is running; cleared when
    /// the scan completes and again for every subsequent fragment.
    triggered: bool,
    /// Re-entrancy guard: a handler callback for this request is on the
    /// stack.
    in_callback: bool,
    trigger_fired: bool,
    cmds: VecDeque<Message>,
    /// Scan start time as reported by the driver's trigger notification.
    start_time_tsf: u64,
    work_id: WorkId,
}

#[derive(Default)]
struct PeriodicState {
    /// Current back-off interval in seconds; zero while periodic scanning
    /// is inactive.
    interval: u16,
    timeout: Option<EventId>,
    handler: Option<Box<dyn PeriodicHandler>>,
    /// Work id of the outstanding periodic request, zero if none.
    id: WorkId,
    needs_active_scan: bool,
}

struct ScanContext {
    wdev_id: u64,
    /// Whether a scan, ours or external, is running on the radio.
    state: ScanState,
    sp: PeriodicState,
    /// Pending requests; the head is the one being serviced.
    requests: VecDeque<ScanRequest>,
    /// Outstanding trigger command, zero if none.
    start_cmd_id: CmdId,
    /// Outstanding results dump, zero if none.
    get_scan_cmd_id: CmdId,
    /// Outstanding firmware-scan dump, zero if none.
    get_fw_scan_cmd_id: CmdId,
    radio: Rc<RefCell<dyn Radio>>,
}

impl ScanContext {
    fn new(wdev_id: u64, radio: Rc<RefCell<dyn Radio>>) -> Self {
        ScanContext {
            wdev_id,
            state: ScanState::NotRunning,
            sp: PeriodicState::default(),
            requests: VecDeque::new(),
            start_cmd_id: 0,
            get_scan_cmd_id: 0,
            get_fw_scan_cmd_id: 0,
            radio,
        }
    }

    fn request_pos(&self, work_id: WorkId) -> Option<usize> {
        self.requests.iter().position(|sr| sr.work_id == work_id)
    }
}

enum DumpKind {
    /// Results for the local request with this work id.
    Request(WorkId),
    /// Results of an external scan, destined for the periodic handler.
    External,
    /// Results the firmware collected on its own.
    Firmware(Option<Box<dyn ScanHandler>>),
}

struct PendingDump {
    wdev_id: u64,
    kind: DumpKind,
    bss_list: Vec<Bss>,
    freqs: Option<FreqSet>,
    /// Engine-clock microseconds at dump start, for per-BSS timestamps.
    time_stamp: u64,
}

pub struct ScanEngine {
    contexts: Vec<ScanContext>,
    transport: Rc<RefCell<dyn Transport>>,
    known_networks: Rc<RefCell<dyn KnownNetworks>>,
    config: Config,
    timer: Timer<TimerEvent>,
    dumps: HashMap<CmdId, PendingDump>,
}

impl ScanEngine {
    pub fn new(
        transport: Rc<RefCell<dyn Transport>>,
        known_networks: Rc<RefCell<dyn KnownNetworks>>,
        config: Config,
    ) -> (Self, TimeStream<TimerEvent>) {
        Self::new_with_clock(transport, known_networks, config, Box::new(MonotonicClock::new()))
    }

    pub fn new_with_clock(
        transport: Rc<RefCell<dyn Transport>>,
        known_networks: Rc<RefCell<dyn KnownNetworks>>,
        config: Config,
        clock: Box<dyn Clock>,
    ) -> (Self, TimeStream<TimerEvent>) {
        let (timer, time_stream) = Timer::new(clock);
        let engine = ScanEngine {
            contexts: Vec::new(),
            transport,
            known_networks,
            config,
            timer,
            dumps: HashMap::new(),
        };
        (engine, time_stream)
    }

    fn ctx_index(&self, wdev_id: u64) -> Option<usize> {
        self.contexts.iter().position(|c| c.wdev_id == wdev_id)
    }

    fn find_request(&self, work_id: WorkId) -> Option<(usize, usize)> {
        if work_id == 0 {
            return None;
        }
        self.contexts
            .iter()
            .enumerate()
            .find_map(|(i, ctx)| ctx.request_pos(work_id).map(|j| (i, j)))
    }

    /// Starts tracking scans on a device. Returns false when the device is
    /// already tracked. The transport's scan multicast subscription is
    /// opened with the first context.
    pub fn add_wdev(&mut self, wdev_id: u64, radio: Rc<RefCell<dyn Radio>>) -> bool {
        if self.ctx_index(wdev_id).is_some() {
            return false;
        }
        self.contexts.push(ScanContext::new(wdev_id, radio));
        if self.contexts.len() == 1 {
            self.transport.borrow_mut().register_scan_events();
        }
        true
    }

    /// Stops tracking a device: cancels its outstanding commands, finalizes
    /// every queued request and drops the context. The multicast
    /// subscription closes with the last context.
    pub fn remove_wdev(&mut self, wdev_id: u64) -> bool {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return false;
        };
        info!("removing scan context for wdev {:x}", wdev_id);
        let mut ctx = self.contexts.remove(idx);

        {
            let mut transport = self.transport.borrow_mut();
            if ctx.start_cmd_id != 0 {
                transport.cancel(ctx.start_cmd_id);
            }
            if ctx.get_scan_cmd_id != 0 {
                transport.cancel(ctx.get_scan_cmd_id);
                self.dumps.remove(&ctx.get_scan_cmd_id);
            }
            if ctx.get_fw_scan_cmd_id != 0 {
                transport.cancel(ctx.get_fw_scan_cmd_id);
                self.dumps.remove(&ctx.get_fw_scan_cmd_id);
            }
        }

        for sr in ctx.requests.drain(..) {
            ctx.radio.borrow_mut().work_done(sr.work_id);
        }

        if self.contexts.is_empty() {
            self.transport.borrow_mut().unregister_scan_events();
        }
        true
    }

    /// Queues a passive scan over `freqs`.
    pub fn passive(
        &mut self,
        wdev_id: u64,
        freqs: FreqSet,
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        let params = ScanParameters { freqs: Some(freqs), ..Default::default() };
        self.scan_common(wdev_id, true, &params, WorkPriority::Scan, handler)
    }

    pub fn passive_full(
        &mut self,
        wdev_id: u64,
        params: &ScanParameters,
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        self.scan_common(wdev_id, true, params, WorkPriority::Scan, handler)
    }

    /// Queues an active scan probing for the hidden known networks, with
    /// `extra_ie` appended to the probe requests.
    pub fn active(
        &mut self,
        wdev_id: u64,
        extra_ie: &[u8],
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        let params = ScanParameters { extra_ie: extra_ie.to_vec(), ..Default::default() };
        self.scan_common(wdev_id, false, &params, WorkPriority::Scan, handler)
    }

    pub fn active_full(
        &mut self,
        wdev_id: u64,
        params: &ScanParameters,
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        self.scan_common(wdev_id, false, params, WorkPriority::Scan, handler)
    }

    fn scan_common(
        &mut self,
        wdev_id: u64,
        passive: bool,
        params: &ScanParameters,
        priority: WorkPriority,
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return 0;
        };
        let cmds = self.build_scan_cmds(idx, passive, params);
        self.enqueue_request(idx, passive, cmds, priority, handler)
    }

    fn enqueue_request(
        &mut self,
        idx: usize,
        passive: bool,
        cmds: VecDeque<Message>,
        priority: WorkPriority,
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        let ctx = &mut self.contexts[idx];
        let work_id = ctx.radio.borrow_mut().work_insert(priority);
        ctx.requests.push_back(ScanRequest {
            handler: Some(handler),
            canceled: false,
            passive,
            started: false,
            periodic: false,
            triggered: false,
            in_callback: false,
            trigger_fired: false,
            cmds,
            start_time_tsf: 0,
            work_id,
        });
        work_id
    }

    /// Queues an active scan probing for the OWE transition twins of the
    /// given BSSes. One command when all twins share an SSID; one per BSS
    /// otherwise, with the flush flag only on the first.
    pub fn owe_hidden(
        &mut self,
        wdev_id: u64,
        bss_list: &[Bss],
        handler: Box<dyn ScanHandler>,
    ) -> ScanId {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return 0;
        };

        let mut freqs = FreqSet::new();
        let mut first_ssid: Option<&[u8]> = None;
        let mut same_ssid = true;
        for bss in bss_list {
            let Some(owe) = &bss.owe_trans else {
                continue;
            };
            add_owe_freq(&mut freqs, bss);
            match first_ssid {
                None => first_ssid = Some(&owe.ssid),
                Some(ssid) => {
                    if ssid != owe.ssid {
                        same_ssid = false;
                        break;
                    }
                }
            }
        }
        if first_ssid.is_none() {
            warn!("owe_hidden called without OWE transition info");
            return 0;
        }

        let mut cmds = VecDeque::new();
        if same_ssid {
            let bss = bss_list.iter().find(|b| b.owe_trans.is_some()).unwrap();
            cmds.push_back(self.build_owe_cmd(idx, false, Some(freqs), bss));
        } else {
            let mut ignore_flush = false;
            for bss in bss_list.iter().filter(|b| b.owe_trans.is_some()) {
                cmds.push_back(self.build_owe_cmd(idx, ignore_flush, None, bss));
                ignore_flush = true;
            }
        }

        self.enqueue_request(idx, false, cmds, WorkPriority::Scan, handler)
    }

    fn build_owe_cmd(
        &self,
        idx: usize,
        ignore_flush: bool,
        freqs: Option<FreqSet>,
        bss: &Bss,
    ) -> Message {
        let owe = bss.owe_trans.as_ref().unwrap();
        let freqs = freqs.unwrap_or_else(|| {
            let mut set = FreqSet::new();
            add_owe_freq(&mut set, bss);
            set
        });
        let params = ScanParameters {
            freqs: Some(freqs),
            ssid: Some(owe.ssid.clone()),
            flush: true,
            ..Default::default()
        };
        let mut cmd = self.build_scan_cmd(idx, ignore_flush, false, &params);
        cmd.append(Attr::ScanSsids(vec![owe.ssid.clone()]));
        cmd
    }

    fn build_scan_cmds(
        &self,
        idx: usize,
        passive: bool,
        params: &ScanParameters,
    ) -> VecDeque<Message> {
        let mut cmds = VecDeque::new();
        let mut cmd = self.build_scan_cmd(idx, false, passive, params);

        if passive {
            cmds.push_back(cmd);
            return cmds;
        }

        if let Some(ssid) = &params.ssid {
            // Direct probe request scan.
            cmd.append(Attr::ScanSsids(vec![ssid.clone()]));
            cmds.push_back(cmd);
            return cmds;
        }

        let max_ssids = self.contexts[idx].radio.borrow().max_num_ssids_per_scan().max(1);
        let mut ssids: Vec<Vec<u8>> = Vec::new();
        for ssid in self.known_networks.borrow().hidden_ssids() {
            ssids.push(ssid);
            if ssids.len() == max_ssids as usize {
                cmd.append(Attr::ScanSsids(std::mem::take(&mut ssids)));
                cmds.push_back(cmd);
                // Consecutive trigger in the batch; the flush flag is
                // dropped so results of all fragments accumulate.
                cmd = self.build_scan_cmd(idx, true, false, params);
            }
        }

        // A trailing broadcast probe is always included.
        ssids.push(Vec::new());
        cmd.append(Attr::ScanSsids(ssids));
        cmds.push_back(cmd);
        cmds
    }

    fn build_scan_cmd(
        &self,
        idx: usize,
        ignore_flush_flag: bool,
        is_passive: bool,
        params: &ScanParameters,
    ) -> Message {
        let ctx = &self.contexts[idx];
        let radio = ctx.radio.borrow();
        let mut msg = Message::new(Cmd::TriggerScan).with(Attr::Wdev(ctx.wdev_id));

        if radio.max_scan_ie_len() > 0 {
            msg.append(Attr::Ie(build_probe_ies(&*radio, params)));
        }

        if let Some(freqs) = &params.freqs {
            msg.append(Attr::ScanFrequencies(freqs.iter().collect()));
        }

        let mut flags = 0u32;
        if params.flush && !ignore_flush_flag {
            flags |= SCAN_FLAG_FLUSH;
        }

        if !is_passive
            && params.randomize_mac_addr_hint
            && radio.can_randomize_mac_addr()
            && !self.config.scan.disable_mac_address_randomization
        {
            // Randomizes 46 bits; locally-administered and unicast are
            // assumed.
            flags |= SCAN_FLAG_RANDOM_ADDR;
        }

        if !is_passive && radio.can_randomize_mac_addr() {
            if let Some(source_mac) = params.source_mac {
                flags |= SCAN_FLAG_RANDOM_ADDR;
                msg.append(Attr::Mac(source_mac));
                msg.append(Attr::MacMask([0xFF; 6]));
            }
        }

        if !is_passive && radio.supports_random_sn() {
            flags |= SCAN_FLAG_RANDOM_SN;
        }

        if flags != 0 {
            msg.append(Attr::ScanFlags(flags));
        }

        if params.no_cck_rates {
            // 802.11b-only rates, in half-Mbit/s units.
            const B_RATES: [u8; 4] = [2, 4, 11, 22];

            msg.append(Attr::TxNoCckRate);

            // Probes going out at OFDM rates should not advertise 802.11b
            // support either.
            match radio.supported_rates(Band::TwoGhz) {
                Some(supported) => {
                    let rates: Vec<u8> =
                        supported.into_iter().filter(|r| !B_RATES.contains(r)).collect();
                    if rates.is_empty() {
                        warn!("radio advertises only CCK rates at 2.4 GHz");
                    } else {
                        msg.append(Attr::ScanSuppRates(vec![(Band::TwoGhz, rates)]));
                    }
                }
                None => warn!("radio reports no supported rates at 2.4 GHz"),
            }
        }

        if radio.supports_scan_dwell() {
            if params.duration != 0 {
                msg.append(Attr::MeasurementDuration(params.duration));
            }
            if params.duration_mandatory {
                msg.append(Attr::MeasurementDurationMandatory);
            }
        }

        msg
    }

    /// Invoked by the radio work queue when the request's work item reaches
    /// the head of the queue.
    pub fn do_scan_work(&mut self, work_id: WorkId) {
        let Some((idx, pos)) = self.find_request(work_id) else {
            return;
        };
        if pos != 0 {
            return;
        }
        if self.contexts[idx].state != ScanState::NotRunning {
            return;
        }
        self.send_trigger(idx);
    }

    fn send_trigger(&mut self, idx: usize) {
        let ctx = &self.contexts[idx];
        let wdev_id = ctx.wdev_id;
        let Some(sr) = ctx.requests.front() else {
            return;
        };
        let Some(cmd) = sr.cmds.front().cloned() else {
            error!("scan request has no commands left to send");
            self.fail_request(wdev_id, ScanError::Io);
            return;
        };

        let cmd_id = self.transport.borrow_mut().send(cmd);
        if cmd_id == 0 {
            error!("scan request: failed to trigger scan");
            self.fail_request(wdev_id, ScanError::Io);
            return;
        }
        self.contexts[idx].start_cmd_id = cmd_id;
    }

    /// Acknowledgement of a previously submitted command.
    pub fn handle_command_response(&mut self, cmd_id: CmdId, result: Result<(), ScanError>) {
        if cmd_id == 0 {
            return;
        }
        let Some(idx) = self.contexts.iter().position(|c| c.start_cmd_id == cmd_id) else {
            debug!("response for unknown command {}", cmd_id);
            return;
        };
        let ctx = &mut self.contexts[idx];
        ctx.start_cmd_id = 0;
        let wdev_id = ctx.wdev_id;

        match result {
            // Assume another scan is in progress and wait for its
            // completion event before retrying.
            Err(ScanError::Busy) => {
                ctx.state = ScanState::Passive;
                return;
            }
            Err(e) => {
                error!("received error during trigger scan: {}", e);
                self.fail_request(wdev_id, e);
                return;
            }
            Ok(()) => {}
        }

        let passive = match ctx.requests.front() {
            Some(sr) => sr.passive,
            None => {
                warn!("trigger acknowledged with no pending request");
                return;
            }
        };
        ctx.state = if passive { ScanState::Passive } else { ScanState::Active };
        debug!(
            "{} scan triggered for wdev {:x}",
            if passive { "passive" } else { "active" },
            wdev_id
        );

        let sr = ctx.requests.front_mut().unwrap();
        sr.triggered = true;
        sr.started = true;
        sr.cmds.pop_front();

        if !sr.trigger_fired {
            sr.trigger_fired = true;
            sr.in_callback = true;
            let work_id = sr.work_id;
            let mut handler = sr.handler.take();
            if let Some(h) = handler.as_mut() {
                h.on_triggered(self, Ok(()));
            }
            self.restore_handler(wdev_id, work_id, handler);
        }
    }

    // Puts a handler back after a trigger callback, unless the request was
    // canceled from inside the callback, in which case dropping the handler
    // here is the destructor.
    fn restore_handler(
        &mut self,
        wdev_id: u64,
        work_id: WorkId,
        handler: Option<Box<dyn ScanHandler>>,
    ) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        let Some(pos) = ctx.request_pos(work_id) else {
            return;
        };
        let sr = &mut ctx.requests[pos];
        sr.in_callback = false;
        if sr.canceled {
            sr.canceled = false;
        } else {
            sr.handler = handler;
        }
    }

    // Fails the head request: the error goes to the trigger callback if it
    // has not fired yet, to the completion callback otherwise.
    fn fail_request(&mut self, wdev_id: u64, err: ScanError) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let Some(sr) = self.contexts[idx].requests.front_mut() else {
            return;
        };
        let work_id = sr.work_id;
        let trigger_fired = sr.trigger_fired;
        sr.in_callback = true;
        let mut handler = sr.handler.take();

        if let Some(h) = handler.as_mut() {
            if !trigger_fired {
                h.on_triggered(self, Err(err));
            } else {
                h.on_done(self, Err(err));
            }
        }
        self.finish_request(wdev_id, work_id);
    }

    // Removes a request from its queue and releases its work-item slot. The
    // caller still holds the handler if a callback was in flight; dropping
    // it afterwards runs the destructor.
    fn finish_request(&mut self, wdev_id: u64, work_id: WorkId) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        let Some(pos) = ctx.request_pos(work_id) else {
            return;
        };
        let sr = ctx.requests.remove(pos).unwrap();
        if sr.periodic && ctx.sp.id == work_id {
            ctx.sp.id = 0;
        }
        let radio = ctx.radio.clone();
        radio.borrow_mut().work_done(work_id);
    }

    // Delivers the final outcome to a request's completion callback and
    // retires the request.
    fn complete_request(
        &mut self,
        wdev_id: u64,
        work_id: WorkId,
        result: Result<ScanResults, ScanError>,
    ) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        if let Ok(results) = &result {
            self.discover_hidden_network_bsses(idx, &results.bss_list);
        }
        let ctx = &mut self.contexts[idx];
        let Some(pos) = ctx.request_pos(work_id) else {
            return;
        };
        let sr = &mut ctx.requests[pos];
        sr.in_callback = true;
        let mut handler = sr.handler.take();
        if let Some(h) = handler.as_mut() {
            h.on_done(self, result);
        }
        self.finish_request(wdev_id, work_id);
    }

    // External scan results go straight to the periodic handler; the
    // back-off timer is not touched.
    fn complete_external(&mut self, wdev_id: u64, result: Result<ScanResults, ScanError>) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        if let Ok(results) = &result {
            self.discover_hidden_network_bsses(idx, &results.bss_list);
        }
        let Some(mut handler) = self.contexts[idx].sp.handler.take() else {
            return;
        };
        handler.on_results(self, result);
        self.put_back_periodic_handler(wdev_id, handler);
    }

    fn discover_hidden_network_bsses(&mut self, idx: usize, bss_list: &[Bss]) {
        if bss_list.iter().any(Bss::has_hidden_ssid) {
            self.contexts[idx].sp.needs_active_scan = true;
        }
    }

    /// Multicast scan notification from the driver.
    pub fn handle_notification(&mut self, msg: &Message) {
        let Some(wdev_id) = msg.wdev() else {
            return;
        };
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        debug!("scan notification {:?} for wdev {:x}", msg.cmd, wdev_id);

        match msg.cmd {
            Cmd::TriggerScan => {
                let ctx = &mut self.contexts[idx];
                ctx.state = if msg.scan_ssids().is_some() {
                    ScanState::Active
                } else {
                    ScanState::Passive
                };
                if let Some(sr) = ctx.requests.front_mut() {
                    sr.start_time_tsf = msg.start_time_tsf().unwrap_or(0);
                }
            }
            Cmd::NewScanResults => self.notify_scan_results(idx, msg),
            Cmd::ScanAborted => self.notify_scan_aborted(idx),
            _ => {}
        }
    }

    fn notify_scan_results(&mut self, idx: usize, msg: &Message) {
        let ctx = &mut self.contexts[idx];
        let wdev_id = ctx.wdev_id;
        ctx.state = ScanState::NotRunning;

        let mut dump_kind: Option<DumpKind> = None;
        let mut resume = false;

        let head_triggered = ctx.requests.front().map_or(false, |sr| sr.triggered);
        if head_triggered {
            // Our own scan finished.
            let sr = ctx.requests.front_mut().unwrap();
            sr.triggered = false;
            let work_id = sr.work_id;

            if sr.handler.is_none() && !sr.in_callback {
                // Canceled after triggering; nobody wants the results.
                self.finish_request(wdev_id, work_id);
                return;
            }

            if sr.cmds.is_empty() {
                // Last fragment: dump results before queue progression so
                // the current request stays at the head throughout.
                dump_kind = Some(DumpKind::Request(work_id));
            } else {
                resume = true;
            }
        } else {
            // An external scan finished.
            if ctx.get_scan_cmd_id != 0 {
                return;
            }
            if ctx.sp.handler.is_some() {
                dump_kind = Some(DumpKind::External);
            }

            let flush = msg.scan_flags() & SCAN_FLAG_FLUSH != 0;
            let started_work =
                ctx.requests.front().filter(|sr| sr.started).map(|sr| sr.work_id);
            if let (Some(work_id), true) = (started_work, flush) {
                // The external scan flushed our partial results out of the
                // kernel.
                self.complete_request(wdev_id, work_id, Err(ScanError::TryAgain));
            } else {
                resume = true;
            }
        }

        if resume {
            // Send the next fragment of an ongoing request, or retry an
            // attempt that bounced off with -EBUSY.
            let Some(idx) = self.ctx_index(wdev_id) else {
                return;
            };
            let ctx = &self.contexts[idx];
            if let Some(sr) = ctx.requests.front() {
                let work_id = sr.work_id;
                if ctx.radio.borrow().work_is_running(work_id) {
                    self.do_scan_work(work_id);
                }
            }
        }

        if let Some(kind) = dump_kind {
            self.start_results_dump(wdev_id, kind, msg);
        }
    }

    fn start_results_dump(&mut self, wdev_id: u64, kind: DumpKind, msg: &Message) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let freqs = msg.scan_frequencies().map(|f| f.iter().copied().collect());
        let dump_msg = Message::new(Cmd::GetScan).with(Attr::Wdev(wdev_id));
        let cmd_id = self.transport.borrow_mut().dump(dump_msg);
        if cmd_id == 0 {
            warn!("failed to start scan results dump");
            if let DumpKind::Request(work_id) = kind {
                self.complete_request(wdev_id, work_id, Err(ScanError::Io));
            }
            return;
        }
        self.contexts[idx].get_scan_cmd_id = cmd_id;
        self.dumps.insert(
            cmd_id,
            PendingDump {
                wdev_id,
                kind,
                bss_list: Vec::new(),
                freqs,
                time_stamp: self.timer.now_us(),
            },
        );
    }

    fn notify_scan_aborted(&mut self, idx: usize) {
        let ctx = &mut self.contexts[idx];
        let wdev_id = ctx.wdev_id;
        ctx.state = ScanState::NotRunning;

        // Nothing pending means an external scan was aborted; ignore.
        let Some(sr) = ctx.requests.front_mut() else {
            return;
        };
        let work_id = sr.work_id;

        if sr.triggered {
            sr.triggered = false;
            if sr.periodic {
                // Don't report aborts of the background scan.
                self.finish_request(wdev_id, work_id);
            } else {
                self.complete_request(wdev_id, work_id, Err(ScanError::Canceled));
            }
        } else if ctx.radio.borrow().work_is_running(work_id) {
            // The abort may have been an external scan ending early, in
            // which case our own scan can start now; if the hardware
            // aborted for another activity we'll just bounce with -EBUSY.
            self.do_scan_work(work_id);
        }
    }

    /// One entry of a results dump.
    pub fn handle_dump_entry(&mut self, cmd_id: CmdId, msg: &Message) {
        let Some(dump) = self.dumps.get(&cmd_id) else {
            return;
        };
        let Some(wdev_id) = msg.wdev() else {
            return;
        };
        if wdev_id != dump.wdev_id {
            warn!("wdev mismatch in scan results");
            return;
        }
        let Some(idx) = self.ctx_index(dump.wdev_id) else {
            return;
        };
        let Some(attrs) = msg.bss() else {
            return;
        };

        let radio = self.contexts[idx].radio.clone();
        let parsed = Bss::from_scan_entry(attrs, &*radio.borrow());
        let band_modifier = self.config.rank.band_modifier_5ghz;
        let dump = self.dumps.get_mut(&cmd_id).unwrap();
        match parsed {
            Ok((mut bss, seen_ms_ago)) => {
                if bss.time_stamp == 0 {
                    bss.time_stamp =
                        dump.time_stamp.saturating_sub(u64::from(seen_ms_ago) * 1_000);
                }
                bss.compute_rank(band_modifier);
                let pos = dump
                    .bss_list
                    .partition_point(|other| Bss::rank_cmp(other, &bss) != Ordering::Greater);
                dump.bss_list.insert(pos, bss);
            }
            // One bad record never aborts the dump.
            Err(e) => warn!("discarding malformed scan result: {}", e),
        }
    }

    /// Completion of a results dump.
    pub fn handle_dump_done(&mut self, cmd_id: CmdId) {
        let Some(dump) = self.dumps.remove(&cmd_id) else {
            return;
        };
        let Some(idx) = self.ctx_index(dump.wdev_id) else {
            return;
        };

        match dump.kind {
            DumpKind::Request(work_id) => {
                self.contexts[idx].get_scan_cmd_id = 0;
                let canceled = self.contexts[idx]
                    .request_pos(work_id)
                    .map_or(true, |pos| self.contexts[idx].requests[pos].canceled);
                if canceled {
                    return;
                }
                let results = ScanResults { bss_list: dump.bss_list, freqs: dump.freqs };
                self.complete_request(dump.wdev_id, work_id, Ok(results));
            }
            DumpKind::External => {
                self.contexts[idx].get_scan_cmd_id = 0;
                let results = ScanResults { bss_list: dump.bss_list, freqs: dump.freqs };
                self.complete_external(dump.wdev_id, Ok(results));
            }
            DumpKind::Firmware(mut handler) => {
                self.contexts[idx].get_fw_scan_cmd_id = 0;
                let result = if dump.bss_list.is_empty() {
                    Err(ScanError::NoResults)
                } else {
                    Ok(ScanResults { bss_list: dump.bss_list, freqs: None })
                };
                if let Some(h) = handler.as_mut() {
                    h.on_done(self, result);
                }
            }
        }
    }

    /// Cancels a pending or running request. The completion callback is
    /// never invoked synchronously from here; the destructor runs by the
    /// time the request is fully retired.
    pub fn cancel(&mut self, wdev_id: u64, id: ScanId) -> bool {
        debug!("trying to cancel scan id {} for wdev {:x}", id, wdev_id);
        let Some(idx) = self.ctx_index(wdev_id) else {
            return false;
        };
        let Some(pos) = self.contexts[idx].request_pos(id) else {
            return false;
        };

        let ctx = &mut self.contexts[idx];

        // Mid-callback for this very request: mark it; the callback frame
        // finalizes the handler when it unwinds.
        if ctx.requests[pos].in_callback {
            ctx.requests[pos].canceled = true;
            return true;
        }

        // Already triggered: results are on their way, silently discard
        // them when they arrive. Dropping the handler is the destructor.
        if ctx.requests[pos].triggered {
            debug!("scan already triggered, waiting for it to complete");
            ctx.requests[pos].handler = None;
            return true;
        }

        // Covers a trigger in flight, a trigger bounced with -EBUSY, and a
        // pending results dump.
        if ctx.radio.borrow().work_is_running(id) {
            debug!("canceling scan already at the head of the queue");
            ctx.requests[pos].canceled = true;
            let start_cmd_id = std::mem::take(&mut ctx.start_cmd_id);
            let get_scan_cmd_id = std::mem::take(&mut ctx.get_scan_cmd_id);
            let transport = self.transport.clone();
            if start_cmd_id != 0 {
                transport.borrow_mut().cancel(start_cmd_id);
            }
            if get_scan_cmd_id != 0 {
                transport.borrow_mut().cancel(get_scan_cmd_id);
                self.dumps.remove(&get_scan_cmd_id);
            }
        }

        self.finish_request(wdev_id, id);
        true
    }

    /// Start time (driver TSF) of a currently triggered request.
    pub fn get_triggered_time(&self, wdev_id: u64, id: ScanId) -> Option<u64> {
        let idx = self.ctx_index(wdev_id)?;
        let ctx = &self.contexts[idx];
        let pos = ctx.request_pos(id)?;
        let sr = &ctx.requests[pos];
        sr.triggered.then_some(sr.start_time_tsf)
    }

    /// Dumps whatever the firmware last scanned on its own (e.g. after an
    /// autonomous roam) without triggering a new scan.
    pub fn get_firmware_scan(&mut self, wdev_id: u64, handler: Box<dyn ScanHandler>) -> bool {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return false;
        };
        if self.contexts[idx].get_fw_scan_cmd_id != 0 {
            return false;
        }
        let msg = Message::new(Cmd::GetScan).with(Attr::Wdev(wdev_id));
        let cmd_id = self.transport.borrow_mut().dump(msg);
        if cmd_id == 0 {
            return false;
        }
        self.contexts[idx].get_fw_scan_cmd_id = cmd_id;
        self.dumps.insert(
            cmd_id,
            PendingDump {
                wdev_id,
                kind: DumpKind::Firmware(Some(handler)),
                bss_list: Vec::new(),
                freqs: None,
                time_stamp: self.timer.now_us(),
            },
        );
        true
    }

    /// Starts the periodic background scan on a device. No-op when disabled
    /// by config or already running.
    pub fn periodic_start(&mut self, wdev_id: u64, handler: Box<dyn PeriodicHandler>) {
        if self.config.scan.disable_periodic_scan {
            return;
        }
        let Some(idx) = self.ctx_index(wdev_id) else {
            error!("periodic_start called without add_wdev");
            return;
        };
        if self.contexts[idx].sp.interval != 0 {
            return;
        }
        debug!("starting periodic scan for wdev {:x}", wdev_id);
        self.contexts[idx].sp.interval = self.config.initial_periodic_interval();
        self.contexts[idx].sp.handler = Some(handler);
        self.periodic_queue(idx);
    }

    pub fn periodic_stop(&mut self, wdev_id: u64) -> bool {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return false;
        };
        if self.contexts[idx].sp.interval == 0 {
            return false;
        }
        debug!("stopping periodic scan for wdev {:x}", wdev_id);
        self.contexts[idx].sp.timeout = None;
        let id = self.contexts[idx].sp.id;
        if id != 0 {
            self.cancel(wdev_id, id);
        }
        let Some(idx) = self.ctx_index(wdev_id) else {
            return true;
        };
        let sp = &mut self.contexts[idx].sp;
        sp.id = 0;
        sp.interval = 0;
        sp.handler = None;
        sp.needs_active_scan = false;
        true
    }

    fn periodic_queue(&mut self, idx: usize) -> bool {
        let ctx = &self.contexts[idx];
        let wdev_id = ctx.wdev_id;
        let needs_active =
            ctx.sp.needs_active_scan && self.known_networks.borrow().has_hidden();
        let active = self.config.scan.enable_active_scanning || needs_active;
        let handler = Box::new(PeriodicScanHandler { wdev_id });

        let id = if active {
            self.contexts[idx].sp.needs_active_scan = false;
            let params =
                ScanParameters { randomize_mac_addr_hint: true, ..Default::default() };
            self.scan_common(wdev_id, false, &params, WorkPriority::PeriodicScan, handler)
        } else {
            let params = ScanParameters::default();
            self.scan_common(wdev_id, true, &params, WorkPriority::PeriodicScan, handler)
        };
        if id == 0 {
            return false;
        }

        let ctx = &mut self.contexts[idx];
        ctx.sp.id = id;
        if let Some(pos) = ctx.request_pos(id) {
            ctx.requests[pos].periodic = true;
        }
        true
    }

    fn periodic_rearm(&mut self, idx: usize) {
        let ctx = &mut self.contexts[idx];
        debug!("arming periodic scan timer: {}", ctx.sp.interval);
        let event = TimerEvent::PeriodicScan { wdev_id: ctx.wdev_id };
        let id =
            self.timer.schedule_after(Duration::from_secs(u64::from(ctx.sp.interval)), event);
        ctx.sp.timeout = Some(id);
    }

    /// A timer entry previously emitted on the time stream came due.
    pub fn handle_timeout(&mut self, event: &TimedEvent<TimerEvent>) {
        let TimerEvent::PeriodicScan { wdev_id } = event.event;
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let ctx = &mut self.contexts[idx];
        if ctx.sp.interval == 0 || ctx.sp.timeout != Some(event.id) {
            return;
        }
        ctx.sp.timeout = None;

        // Fired before the previous periodic scan could even start; just
        // rearm with the same interval.
        if ctx.sp.id != 0 {
            debug!("periodic scan timer fired before the scan could start");
            self.periodic_rearm(idx);
            return;
        }

        let max = self.config.maximum_periodic_interval();
        ctx.sp.interval = ctx.sp.interval.saturating_mul(2).min(max);
        self.periodic_queue(idx);
    }

    fn periodic_triggered(&mut self, wdev_id: u64, result: Result<(), ScanError>) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        if result.is_err() {
            self.periodic_rearm(idx);
            return;
        }
        debug!("periodic scan triggered for wdev {:x}", wdev_id);
        let Some(mut handler) = self.contexts[idx].sp.handler.take() else {
            return;
        };
        handler.on_triggered(self);
        self.put_back_periodic_handler(wdev_id, handler);
    }

    fn periodic_done(&mut self, wdev_id: u64, result: Result<ScanResults, ScanError>) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        self.periodic_rearm(idx);
        let Some(mut handler) = self.contexts[idx].sp.handler.take() else {
            return;
        };
        handler.on_results(self, result);
        self.put_back_periodic_handler(wdev_id, handler);
    }

    fn put_back_periodic_handler(&mut self, wdev_id: u64, handler: Box<dyn PeriodicHandler>) {
        let Some(idx) = self.ctx_index(wdev_id) else {
            return;
        };
        let sp = &mut self.contexts[idx].sp;
        // A re-entrant periodic_stop (or restart) owns the slot now.
        if sp.interval != 0 && sp.handler.is_none() {
            sp.handler = Some(handler);
        }
    }
}

// Adapter that routes the internal periodic request's callbacks back into
// the engine's periodic state machine.
struct PeriodicScanHandler {
    wdev_id: u64,
}

impl ScanHandler for PeriodicScanHandler {
    fn on_triggered(&mut self, engine: &mut ScanEngine, result: Result<(), ScanError>) {
        engine.periodic_triggered(self.wdev_id, result);
    }

    fn on_done(&mut self, engine: &mut ScanEngine, result: Result<ScanResults, ScanError>) {
        engine.periodic_done(self.wdev_id, result);
    }
}

fn add_owe_freq(freqs: &mut FreqSet, bss: &Bss) {
    let owe = bss.owe_trans.as_ref().unwrap();
    match owe.channel_info {
        Some((oper_class, channel)) => match oper_class_to_frequency(oper_class, channel) {
            Some(freq) => {
                freqs.add(freq);
            }
            None => warn!("OWE transition element names an unknown channel"),
        },
        None => {
            freqs.add(bss.frequency);
        }
    }
}

// Probe-request elements in 802.11 order (IEEE Std 802.11-2016, Table
// 9-33): Extended Capabilities (9), Interworking (12), then the caller's
// extra elements, assumed to sort last (WSC vendor specific).
fn build_probe_ies(radio: &dyn Radio, params: &ScanParameters) -> Vec<u8> {
    let mut ies = radio.extended_capabilities();

    // Interworking is included iff the radio advertises the Interworking
    // extended capability (bit 31).
    if ies.len() > 5 && ies[5] & 0x80 != 0 {
        // Private network, Internet=0, ASRA=0, ESR=0, UESA=0.
        ies.extend_from_slice(&[Id::INTERWORKING.0, 1, 0]);
    }

    ies.extend_from_slice(&params.extra_ie);
    ies
}

/// Builds a single-frequency direct-probe scan command, addressed by
/// interface index, for measurement collaborators.
pub fn build_direct_probe_cmd(
    ifindex: u32,
    radio: &dyn Radio,
    frequency: u32,
    ssid: &[u8],
) -> Message {
    let mut msg = Message::new(Cmd::TriggerScan)
        .with(Attr::Ifindex(ifindex))
        .with(Attr::ScanFrequencies(vec![frequency]));
    if radio.supports_random_sn() {
        msg.append(Attr::ScanFlags(SCAN_FLAG_RANDOM_SN));
    }
    msg.append(Attr::ScanSsids(vec![ssid.to_vec()]));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BssAttr;
    use std::cell::Cell;
    use wlan_common::assert_variant;

    const DEV: u64 = 1;

    struct FixedClock(u64);
    impl Clock for FixedClock {
        fn now_us(&self) -> u64 {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        next_cmd_id: CmdId,
        sent: Vec<(CmdId, Message)>,
        dumps: Vec<(CmdId, Message)>,
        canceled: Vec<CmdId>,
        registered: bool,
        fail_sends: bool,
    }

    impl Transport for FakeTransport {
        fn register_scan_events(&mut self) {
            self.registered = true;
        }
        fn unregister_scan_events(&mut self) {
            self.registered = false;
        }
        fn send(&mut self, msg: Message) -> CmdId {
            if self.fail_sends {
                return 0;
            }
            self.next_cmd_id += 1;
            self.sent.push((self.next_cmd_id, msg));
            self.next_cmd_id
        }
        fn dump(&mut self, msg: Message) -> CmdId {
            self.next_cmd_id += 1;
            self.dumps.push((self.next_cmd_id, msg));
            self.next_cmd_id
        }
        fn cancel(&mut self, cmd_id: CmdId) {
            self.canceled.push(cmd_id);
        }
    }

    struct FakeRadio {
        max_ssids: u8,
        ext_capa: Vec<u8>,
        rates_2g: Option<Vec<u8>>,
        data_rate: Option<u64>,
        random_mac: bool,
        random_sn: bool,
        dwell: bool,
        next_work_id: WorkId,
        queue: Vec<WorkId>,
        running: Option<WorkId>,
    }

    impl Default for FakeRadio {
        fn default() -> Self {
            FakeRadio {
                max_ssids: 4,
                ext_capa: vec![0x7F, 0x04, 0x00, 0x00, 0x00, 0x00],
                rates_2g: None,
                data_rate: Some(100_000_000),
                random_mac: false,
                random_sn: false,
                dwell: false,
                next_work_id: 0,
                queue: Vec::new(),
                running: None,
            }
        }
    }

    impl Radio for FakeRadio {
        fn max_num_ssids_per_scan(&self) -> u8 {
            self.max_ssids
        }
        fn max_scan_ie_len(&self) -> u16 {
            2048
        }
        fn can_randomize_mac_addr(&self) -> bool {
            self.random_mac
        }
        fn supports_random_sn(&self) -> bool {
            self.random_sn
        }
        fn supports_scan_dwell(&self) -> bool {
            self.dwell
        }
        fn extended_capabilities(&self) -> Vec<u8> {
            self.ext_capa.clone()
        }
        fn supported_rates(&self, band: Band) -> Option<Vec<u8>> {
            match band {
                Band::TwoGhz => self.rates_2g.clone(),
                _ => None,
            }
        }
        fn estimate_data_rate(&self, _ies: &[u8], _signal_strength: i32) -> Option<u64> {
            self.data_rate
        }
        fn work_insert(&mut self, _priority: WorkPriority) -> WorkId {
            self.next_work_id += 1;
            let id = self.next_work_id;
            self.queue.push(id);
            if self.running.is_none() {
                self.running = Some(id);
            }
            id
        }
        fn work_done(&mut self, id: WorkId) {
            self.queue.retain(|&w| w != id);
            if self.running == Some(id) {
                self.running = self.queue.first().copied();
            }
        }
        fn work_is_running(&self, id: WorkId) -> bool {
            self.running == Some(id)
        }
    }

    #[derive(Default)]
    struct FakeKnownNetworks {
        hidden: Vec<Vec<u8>>,
    }

    impl KnownNetworks for FakeKnownNetworks {
        fn hidden_ssids(&self) -> Vec<Vec<u8>> {
            self.hidden.clone()
        }
    }

    #[derive(Default)]
    struct Record {
        triggered: Vec<Result<(), ScanError>>,
        done: Vec<Result<ScanResults, ScanError>>,
        destroyed: usize,
    }

    struct Recorder {
        record: Rc<RefCell<Record>>,
    }

    impl Recorder {
        fn new() -> (Box<Self>, Rc<RefCell<Record>>) {
            let record = Rc::new(RefCell::new(Record::default()));
            (Box::new(Recorder { record: record.clone() }), record)
        }
    }

    impl ScanHandler for Recorder {
        fn on_triggered(&mut self, _engine: &mut ScanEngine, result: Result<(), ScanError>) {
            self.record.borrow_mut().triggered.push(result);
        }
        fn on_done(&mut self, _engine: &mut ScanEngine, result: Result<ScanResults, ScanError>) {
            self.record.borrow_mut().done.push(result);
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.record.borrow_mut().destroyed += 1;
        }
    }

    // Registers no trigger callback; failures take the default forwarding
    // path into on_done.
    struct DoneOnly {
        record: Rc<RefCell<Record>>,
    }

    impl ScanHandler for DoneOnly {
        fn on_done(&mut self, _engine: &mut ScanEngine, result: Result<ScanResults, ScanError>) {
            self.record.borrow_mut().done.push(result);
        }
    }

    #[derive(Default)]
    struct PeriodicRecord {
        triggers: usize,
        results: Vec<Result<ScanResults, ScanError>>,
    }

    struct PeriodicRecorder {
        record: Rc<RefCell<PeriodicRecord>>,
    }

    impl PeriodicRecorder {
        fn new() -> (Box<Self>, Rc<RefCell<PeriodicRecord>>) {
            let record = Rc::new(RefCell::new(PeriodicRecord::default()));
            (Box::new(PeriodicRecorder { record: record.clone() }), record)
        }
    }

    impl PeriodicHandler for PeriodicRecorder {
        fn on_triggered(&mut self, _engine: &mut ScanEngine) {
            self.record.borrow_mut().triggers += 1;
        }
        fn on_results(
            &mut self,
            _engine: &mut ScanEngine,
            result: Result<ScanResults, ScanError>,
        ) {
            self.record.borrow_mut().results.push(result);
        }
    }

    struct Harness {
        engine: ScanEngine,
        transport: Rc<RefCell<FakeTransport>>,
        radio: Rc<RefCell<FakeRadio>>,
        time: TimeStream<TimerEvent>,
    }

    fn harness() -> Harness {
        harness_with(Config::default(), FakeRadio::default(), FakeKnownNetworks::default())
    }

    fn harness_with(config: Config, radio: FakeRadio, known: FakeKnownNetworks) -> Harness {
        let transport = Rc::new(RefCell::new(FakeTransport::default()));
        let radio = Rc::new(RefCell::new(radio));
        let known = Rc::new(RefCell::new(known));
        let (mut engine, time) = ScanEngine::new_with_clock(
            transport.clone(),
            known.clone(),
            config,
            Box::new(FixedClock(1_000_000_000)),
        );
        assert!(engine.add_wdev(DEV, radio.clone()));
        Harness { engine, transport, radio, time }
    }

    impl Harness {
        fn last_sent_cmd_id(&self) -> CmdId {
            self.transport.borrow().sent.last().expect("no command sent").0
        }

        fn last_sent(&self) -> Message {
            self.transport.borrow().sent.last().expect("no command sent").1.clone()
        }

        fn sent_count(&self) -> usize {
            self.transport.borrow().sent.len()
        }

        fn last_dump_id(&self) -> CmdId {
            self.transport.borrow().dumps.last().expect("no dump started").0
        }

        fn running_work(&self) -> Option<WorkId> {
            self.radio.borrow().running
        }

        fn start_head(&mut self) {
            let id = self.running_work().expect("no work item running");
            self.engine.do_scan_work(id);
        }

        fn ack_trigger(&mut self) {
            let id = self.last_sent_cmd_id();
            self.engine.handle_command_response(id, Ok(()));
        }

        fn notify(&mut self, cmd: Cmd, extra: Vec<Attr>) {
            let mut msg = Message::new(cmd).with(Attr::Wdev(DEV));
            for attr in extra {
                msg.append(attr);
            }
            self.engine.handle_notification(&msg);
        }

        fn scan_results_event(&mut self) {
            self.notify(Cmd::NewScanResults, vec![]);
        }

        fn deliver_bss(&mut self, attrs: Vec<(BssAttr, Vec<u8>)>) {
            let id = self.last_dump_id();
            let msg =
                Message::new(Cmd::NewScanResults).with(Attr::Wdev(DEV)).with(Attr::Bss(attrs));
            self.engine.handle_dump_entry(id, &msg);
        }

        fn finish_dump(&mut self) {
            let id = self.last_dump_id();
            self.engine.handle_dump_done(id);
        }

        fn next_timer(&mut self) -> (Duration, TimedEvent<TimerEvent>) {
            self.time.try_next().unwrap().expect("expected a scheduled timeout")
        }
    }

    fn ssid_ies(ssid: &[u8]) -> Vec<u8> {
        let mut ies = vec![0x00, ssid.len() as u8];
        ies.extend_from_slice(ssid);
        ies
    }

    fn bss_entry(last_octet: u8, freq: u32, signal: i32, ies: Vec<u8>) -> Vec<(BssAttr, Vec<u8>)> {
        vec![
            (BssAttr::Bssid, vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last_octet]),
            (BssAttr::Capability, 0x0401u16.to_le_bytes().to_vec()),
            (BssAttr::Frequency, freq.to_le_bytes().to_vec()),
            (BssAttr::SignalMbm, signal.to_le_bytes().to_vec()),
            (BssAttr::InformationElements, ies),
        ]
    }

    #[test]
    fn add_remove_wdev_is_idempotent() {
        let mut h = harness();
        assert!(h.transport.borrow().registered);
        assert!(!h.engine.add_wdev(DEV, h.radio.clone()));
        assert!(h.engine.remove_wdev(DEV));
        assert!(!h.transport.borrow().registered);
        assert!(!h.engine.remove_wdev(DEV));
        assert!(h.engine.add_wdev(DEV, h.radio.clone()));
        assert!(h.transport.borrow().registered);
    }

    #[test]
    fn passive_scan_end_to_end() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        let id = h.engine.passive(DEV, [2412, 2437, 2462].into_iter().collect(), handler);
        assert_ne!(id, 0);

        h.start_head();
        let cmd = h.last_sent();
        assert_eq!(cmd.cmd, Cmd::TriggerScan);
        assert_eq!(cmd.wdev(), Some(DEV));
        let mut freqs = cmd.scan_frequencies().expect("expected frequencies").to_vec();
        freqs.sort_unstable();
        assert_eq!(freqs, vec![2412, 2437, 2462]);
        assert_eq!(cmd.scan_ssids(), None);

        h.ack_trigger();
        assert_eq!(record.borrow().triggered, vec![Ok(())]);
        assert!(record.borrow().done.is_empty());

        h.notify(Cmd::TriggerScan, vec![Attr::ScanStartTimeTsf(0xABCD)]);
        assert_eq!(h.engine.get_triggered_time(DEV, id), Some(0xABCD));

        h.notify(Cmd::NewScanResults, vec![Attr::ScanFrequencies(vec![2412, 2437, 2462])]);
        let dump = h.transport.borrow().dumps.last().unwrap().1.clone();
        assert_eq!(dump.cmd, Cmd::GetScan);
        assert_eq!(dump.wdev(), Some(DEV));

        h.deliver_bss(bss_entry(0xFF, 2437, -5000, ssid_ies(b"Test")));
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.done.len(), 1);
        let results = assert_variant!(&record.done[0], Ok(r) => r);
        assert_eq!(results.bss_list.len(), 1);
        let bss = &results.bss_list[0];
        assert_eq!(bss.ssid(), b"Test");
        assert_eq!(bss.frequency, 2437);
        assert!(bss.rank > 0);
        let freqs = results.freqs.as_ref().expect("expected result frequencies");
        assert!(freqs.contains(2412) && freqs.contains(2437) && freqs.contains(2462));
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn unknown_device_returns_invalid_id() {
        let mut h = harness();
        let (handler, _record) = Recorder::new();
        assert_eq!(h.engine.passive(99, FreqSet::new(), handler), 0);
    }

    #[test]
    fn hidden_ssid_fragmentation() {
        let mut radio = FakeRadio::default();
        radio.max_ssids = 4;
        let known = FakeKnownNetworks {
            hidden: (0..12).map(|i| format!("hidden{:02}", i).into_bytes()).collect(),
        };
        let mut h = harness_with(Config::default(), radio, known);

        let (handler, record) = Recorder::new();
        let params = ScanParameters { flush: true, ..Default::default() };
        let id = h.engine.active_full(DEV, &params, handler);
        assert_ne!(id, 0);

        h.start_head();
        for fragment in 0..4 {
            let cmd = h.last_sent();
            let ssids = cmd.scan_ssids().expect("expected SSID attributes");
            if fragment < 3 {
                assert_eq!(ssids.len(), 4);
                assert!(ssids.iter().all(|s| !s.is_empty()));
            } else {
                // Final fragment: remaining hidden SSIDs plus the broadcast
                // probe.
                assert_eq!(ssids.last().map(Vec::len), Some(0));
            }
            let flush = cmd.scan_flags() & SCAN_FLAG_FLUSH != 0;
            assert_eq!(flush, fragment == 0, "only the first fragment may flush");

            h.ack_trigger();
            h.scan_results_event();
        }
        assert_eq!(h.sent_count(), 4);
        assert_eq!(record.borrow().triggered, vec![Ok(())]);

        h.finish_dump();
        let record = record.borrow();
        assert_eq!(record.done.len(), 1);
        assert_variant!(&record.done[0], Ok(_));
        assert_eq!(record.destroyed, 1);
    }

    #[test]
    fn trigger_error_reports_through_trigger_callback() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();

        let cmd_id = h.last_sent_cmd_id();
        h.engine.handle_command_response(cmd_id, Err(ScanError::Driver(-22)));

        let record = record.borrow();
        assert_eq!(record.triggered, vec![Err(ScanError::Driver(-22))]);
        assert!(record.done.is_empty());
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn trigger_error_defaults_to_done_callback() {
        let mut h = harness();
        let record = Rc::new(RefCell::new(Record::default()));
        h.engine.passive(DEV, FreqSet::new(), Box::new(DoneOnly { record: record.clone() }));
        h.start_head();

        let cmd_id = h.last_sent_cmd_id();
        h.engine.handle_command_response(cmd_id, Err(ScanError::Driver(-22)));
        assert_eq!(record.borrow().done, vec![Err(ScanError::Driver(-22))]);
    }

    #[test]
    fn send_failure_fails_request() {
        let mut h = harness();
        h.transport.borrow_mut().fail_sends = true;
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();

        let record = record.borrow();
        assert_eq!(record.triggered, vec![Err(ScanError::Io)]);
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn cancel_before_trigger_ack() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        let id = h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        let cmd_id = h.last_sent_cmd_id();

        assert!(h.engine.cancel(DEV, id));
        assert!(h.transport.borrow().canceled.contains(&cmd_id));
        let record = record.borrow();
        assert!(record.triggered.is_empty());
        assert!(record.done.is_empty());
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);

        assert!(!h.engine.cancel(DEV, id));
    }

    #[test]
    fn cancel_after_trigger_discards_results_silently() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        let id = h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        h.ack_trigger();

        assert!(h.engine.cancel(DEV, id));
        // Destructor runs at cancel time, the request lives on until the
        // driver reports.
        assert_eq!(record.borrow().destroyed, 1);

        h.scan_results_event();
        assert!(h.transport.borrow().dumps.is_empty());
        assert!(record.borrow().done.is_empty());
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn cancel_from_own_done_callback() {
        struct CancelOnDone {
            record: Rc<RefCell<Record>>,
            id: Rc<Cell<ScanId>>,
        }
        impl ScanHandler for CancelOnDone {
            fn on_done(
                &mut self,
                engine: &mut ScanEngine,
                result: Result<ScanResults, ScanError>,
            ) {
                assert!(engine.cancel(DEV, self.id.get()));
                self.record.borrow_mut().done.push(result);
            }
        }
        impl Drop for CancelOnDone {
            fn drop(&mut self) {
                self.record.borrow_mut().destroyed += 1;
            }
        }

        let mut h = harness();
        let record = Rc::new(RefCell::new(Record::default()));
        let id_cell = Rc::new(Cell::new(0));
        let id = h.engine.passive(
            DEV,
            FreqSet::new(),
            Box::new(CancelOnDone { record: record.clone(), id: id_cell.clone() }),
        );
        id_cell.set(id);

        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.done.len(), 1);
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn queue_scan_from_own_done_callback() {
        struct ChainOnDone {
            next_id: Rc<Cell<ScanId>>,
        }
        struct Noop;
        impl ScanHandler for Noop {
            fn on_done(&mut self, _: &mut ScanEngine, _: Result<ScanResults, ScanError>) {}
        }
        impl ScanHandler for ChainOnDone {
            fn on_done(&mut self, engine: &mut ScanEngine, _: Result<ScanResults, ScanError>) {
                self.next_id.set(engine.passive(DEV, FreqSet::new(), Box::new(Noop)));
            }
        }

        let mut h = harness();
        let next_id = Rc::new(Cell::new(0));
        h.engine.passive(DEV, FreqSet::new(), Box::new(ChainOnDone { next_id: next_id.clone() }));
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();

        assert_ne!(next_id.get(), 0);
        assert_eq!(h.running_work(), Some(next_id.get()));
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn busy_trigger_waits_for_external_scan() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();

        let cmd_id = h.last_sent_cmd_id();
        h.engine.handle_command_response(cmd_id, Err(ScanError::Busy));
        assert!(record.borrow().triggered.is_empty(), "busy must not fail the request");

        // The external scan finishes; ours is retried.
        h.scan_results_event();
        assert_eq!(h.sent_count(), 2);

        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.triggered, vec![Ok(())]);
        assert_eq!(record.done.len(), 1);
        assert_variant!(&record.done[0], Ok(_));
        assert_eq!(record.destroyed, 1);
    }

    #[test]
    fn external_flush_fails_started_scan() {
        let mut radio = FakeRadio::default();
        radio.max_ssids = 4;
        let known = FakeKnownNetworks {
            hidden: (0u8..5).map(|i| vec![b'h', i]).collect(),
        };
        let mut h = harness_with(Config::default(), radio, known);

        let (handler, record) = Recorder::new();
        h.engine.active(DEV, &[], handler);
        h.start_head();
        h.ack_trigger();
        // First fragment done; second goes out.
        h.scan_results_event();
        assert_eq!(h.sent_count(), 2);

        // An external scan with the flush flag discarded our kernel-side
        // results before the second fragment was accepted.
        h.notify(Cmd::NewScanResults, vec![Attr::ScanFlags(SCAN_FLAG_FLUSH)]);

        let record = record.borrow();
        assert_eq!(record.done, vec![Err(ScanError::TryAgain)]);
        assert_eq!(record.destroyed, 1);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn abort_of_triggered_scan_reports_canceled() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        h.ack_trigger();

        h.notify(Cmd::ScanAborted, vec![]);
        let record = record.borrow();
        assert_eq!(record.done, vec![Err(ScanError::Canceled)]);
        assert_eq!(record.destroyed, 1);
    }

    #[test]
    fn abort_before_trigger_retries() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();

        let cmd_id = h.last_sent_cmd_id();
        h.engine.handle_command_response(cmd_id, Err(ScanError::Busy));
        // A spurious abort of the external scan frees the radio.
        h.notify(Cmd::ScanAborted, vec![]);
        assert_eq!(h.sent_count(), 2);
        assert!(record.borrow().done.is_empty());
    }

    #[test]
    fn external_trigger_defers_local_scan() {
        let mut h = harness();
        // An externally initiated active scan is announced.
        h.notify(Cmd::TriggerScan, vec![Attr::ScanSsids(vec![vec![]])]);

        let (handler, _record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        assert_eq!(h.sent_count(), 0, "must not scan while the radio is busy");

        h.scan_results_event();
        assert_eq!(h.sent_count(), 1);
    }

    #[test]
    fn malformed_dump_entry_is_discarded() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();

        let mut bad = bss_entry(0x01, 2412, -4000, ssid_ies(b"bad"));
        bad[0].1.truncate(5); // five-byte BSSID
        h.deliver_bss(bad);
        h.deliver_bss(bss_entry(0x02, 2437, -5000, ssid_ies(b"good")));
        h.finish_dump();

        let record = record.borrow();
        let results = assert_variant!(&record.done[0], Ok(r) => r);
        assert_eq!(results.bss_list.len(), 1);
        assert_eq!(results.bss_list[0].ssid(), b"good");
    }

    #[test]
    fn results_are_ordered_by_rank() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();

        // Same data rate; utilization differentiates the ranks.
        let mut loaded = ssid_ies(b"loaded");
        loaded.extend_from_slice(&[0x0B, 0x05, 0x00, 0x00, 0xC8, 0x00, 0x00]);
        let mut idle = ssid_ies(b"idle");
        idle.extend_from_slice(&[0x0B, 0x05, 0x00, 0x00, 0x10, 0x00, 0x00]);

        h.deliver_bss(bss_entry(0x01, 2412, -5000, loaded));
        h.deliver_bss(bss_entry(0x02, 2437, -5000, idle));
        h.finish_dump();

        let record = record.borrow();
        let results = assert_variant!(&record.done[0], Ok(r) => r);
        assert_eq!(results.bss_list.len(), 2);
        assert_eq!(results.bss_list[0].ssid(), b"idle");
        assert_eq!(results.bss_list[1].ssid(), b"loaded");
        assert!(results.bss_list[0].rank > results.bss_list[1].rank);
    }

    #[test]
    fn requests_complete_in_fifo_order() {
        let mut h = harness();
        let (h1, r1) = Recorder::new();
        let (h2, r2) = Recorder::new();
        let id1 = h.engine.passive(DEV, FreqSet::new(), h1);
        let id2 = h.engine.passive(DEV, FreqSet::new(), h2);

        // The queued request must not start ahead of the head.
        h.engine.do_scan_work(id2);
        assert_eq!(h.sent_count(), 0);

        assert_eq!(h.running_work(), Some(id1));
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();
        assert_eq!(r1.borrow().done.len(), 1);
        assert!(r2.borrow().done.is_empty());

        assert_eq!(h.running_work(), Some(id2));
        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();
        assert_eq!(r2.borrow().done.len(), 1);
        assert_eq!(r1.borrow().destroyed, 1);
        assert_eq!(r2.borrow().destroyed, 1);
    }

    #[test]
    fn periodic_scan_backoff() {
        let mut config = Config::default();
        config.scan.initial_periodic_scan_interval = 10;
        config.scan.maximum_periodic_scan_interval = 60;
        let mut h = harness_with(config, FakeRadio::default(), FakeKnownNetworks::default());

        let (handler, record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);

        let mut delays = Vec::new();
        for _ in 0..5 {
            h.start_head();
            h.ack_trigger();
            h.scan_results_event();
            h.finish_dump();

            let (delay, event) = h.next_timer();
            delays.push(delay.as_secs());
            h.engine.handle_timeout(&event);
        }

        assert_eq!(delays, vec![10, 20, 40, 60, 60]);
        let record = record.borrow();
        assert_eq!(record.triggers, 5);
        assert_eq!(record.results.len(), 5);
    }

    #[test]
    fn periodic_start_disabled_by_config() {
        let mut config = Config::default();
        config.scan.disable_periodic_scan = true;
        let mut h = harness_with(config, FakeRadio::default(), FakeKnownNetworks::default());

        let (handler, _record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn periodic_stop_cancels_pending_scan() {
        let mut h = harness();
        let (handler, record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);
        assert!(h.running_work().is_some());

        assert!(h.engine.periodic_stop(DEV));
        assert_eq!(h.running_work(), None);
        assert!(record.borrow().results.is_empty());
        assert!(!h.engine.periodic_stop(DEV));
    }

    #[test]
    fn periodic_switches_to_active_after_hidden_bss() {
        let mut radio = FakeRadio::default();
        radio.random_mac = true;
        let known = FakeKnownNetworks { hidden: vec![b"secret".to_vec()] };
        let mut h = harness_with(Config::default(), radio, known);

        let (handler, _record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);

        h.start_head();
        let cmd = h.last_sent();
        assert_eq!(cmd.scan_ssids(), None, "first periodic scan is passive");
        h.ack_trigger();
        h.scan_results_event();
        h.deliver_bss(bss_entry(0x01, 2412, -5000, ssid_ies(b"")));
        h.finish_dump();

        let (_, event) = h.next_timer();
        h.engine.handle_timeout(&event);

        h.start_head();
        let cmd = h.last_sent();
        let ssids = cmd.scan_ssids().expect("hidden BSS requires an active scan");
        assert!(ssids.contains(&b"secret".to_vec()));
        assert_eq!(ssids.last().map(Vec::len), Some(0));
        assert_ne!(cmd.scan_flags() & SCAN_FLAG_RANDOM_ADDR, 0);
    }

    #[test]
    fn periodic_abort_is_absorbed() {
        let mut h = harness();
        let (handler, record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);

        h.start_head();
        h.ack_trigger();
        assert_eq!(record.borrow().triggers, 1);

        h.notify(Cmd::ScanAborted, vec![]);
        assert!(record.borrow().results.is_empty());
        assert_eq!(h.running_work(), None);
    }

    #[test]
    fn external_results_reach_periodic_handler() {
        let mut h = harness();
        let (handler, record) = PeriodicRecorder::new();
        h.engine.periodic_start(DEV, handler);

        h.start_head();
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();
        assert_eq!(record.borrow().results.len(), 1);
        let _ = h.next_timer();

        // Some other process scans; we piggyback on its results.
        h.scan_results_event();
        h.deliver_bss(bss_entry(0x03, 2462, -6000, ssid_ies(b"ext")));
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.results.len(), 2);
        let results = assert_variant!(&record.results[1], Ok(r) => r);
        assert_eq!(results.bss_list[0].ssid(), b"ext");
        // Piggybacked results don't touch the back-off timer.
        assert!(h.time.try_next().is_err());
    }

    #[test]
    fn firmware_scan_returns_results() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        assert!(h.engine.get_firmware_scan(DEV, handler));

        h.deliver_bss(bss_entry(0x01, 5180, -4500, ssid_ies(b"roamed")));
        h.finish_dump();

        let record = record.borrow();
        let results = assert_variant!(&record.done[0], Ok(r) => r);
        assert_eq!(results.bss_list[0].ssid(), b"roamed");
        assert_eq!(record.destroyed, 1);
    }

    #[test]
    fn firmware_scan_empty_reports_no_results() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        assert!(h.engine.get_firmware_scan(DEV, handler));
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.done, vec![Err(ScanError::NoResults)]);
        assert_eq!(record.destroyed, 1);
    }

    #[test]
    fn firmware_scan_unknown_device() {
        let mut h = harness();
        let (handler, _record) = Recorder::new();
        assert!(!h.engine.get_firmware_scan(7, handler));
    }

    #[test]
    fn remove_wdev_cancels_outstanding_commands() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        h.engine.passive(DEV, FreqSet::new(), handler);
        h.start_head();
        let cmd_id = h.last_sent_cmd_id();

        assert!(h.engine.remove_wdev(DEV));
        assert!(h.transport.borrow().canceled.contains(&cmd_id));
        assert_eq!(record.borrow().destroyed, 1);
        assert!(!h.transport.borrow().registered);
    }

    fn owe_bss(freq: u32, owe_ssid: &[u8], channel_info: Option<(u8, u8)>) -> Bss {
        let mut vendor = vec![0x50, 0x6F, 0x9A, 0x1C];
        vendor.extend_from_slice(&[0x11; 6]);
        vendor.push(owe_ssid.len() as u8);
        vendor.extend_from_slice(owe_ssid);
        if let Some((oper_class, channel)) = channel_info {
            vendor.push(oper_class);
            vendor.push(channel);
        }
        let mut ies = ssid_ies(b"open");
        ies.push(0xDD);
        ies.push(vendor.len() as u8);
        ies.extend_from_slice(&vendor);

        let radio = FakeRadio::default();
        Bss::from_scan_entry(&bss_entry(0x01, freq, -5000, ies), &radio)
            .expect("expected OWE BSS to parse")
            .0
    }

    #[test]
    fn owe_hidden_same_ssid_uses_one_command() {
        let mut h = harness();
        let (handler, _record) = Recorder::new();
        let list = vec![owe_bss(2437, b"owe-net", None), owe_bss(2437, b"owe-net", Some((115, 36)))];
        let id = h.engine.owe_hidden(DEV, &list, handler);
        assert_ne!(id, 0);

        h.start_head();
        assert_eq!(h.sent_count(), 1);
        let cmd = h.last_sent();
        assert_eq!(cmd.scan_ssids(), Some(&[b"owe-net".to_vec()][..]));
        assert_ne!(cmd.scan_flags() & SCAN_FLAG_FLUSH, 0);
        let freqs = cmd.scan_frequencies().expect("expected frequencies");
        assert!(freqs.contains(&2437) && freqs.contains(&5180));
    }

    #[test]
    fn owe_hidden_different_ssids_flush_first_only() {
        let mut h = harness();
        let (handler, record) = Recorder::new();
        let list = vec![owe_bss(2437, b"owe-a", None), owe_bss(5180, b"owe-b", None)];
        h.engine.owe_hidden(DEV, &list, handler);

        h.start_head();
        let first = h.last_sent();
        assert_eq!(first.scan_ssids(), Some(&[b"owe-a".to_vec()][..]));
        assert_ne!(first.scan_flags() & SCAN_FLAG_FLUSH, 0);
        h.ack_trigger();
        h.scan_results_event();

        let second = h.last_sent();
        assert_eq!(second.scan_ssids(), Some(&[b"owe-b".to_vec()][..]));
        assert_eq!(second.scan_flags() & SCAN_FLAG_FLUSH, 0);
        h.ack_trigger();
        h.scan_results_event();
        h.finish_dump();

        let record = record.borrow();
        assert_eq!(record.triggered, vec![Ok(())]);
        assert_eq!(record.done.len(), 1);
    }

    #[test]
    fn owe_hidden_without_info_returns_invalid_id() {
        let mut h = harness();
        let (handler, _record) = Recorder::new();
        let plain = {
            let radio = FakeRadio::default();
            Bss::from_scan_entry(&bss_entry(0x01, 2412, -5000, ssid_ies(b"x")), &radio)
                .unwrap()
                .0
        };
        assert_eq!(h.engine.owe_hidden(DEV, &[plain], handler), 0);
    }

    #[test]
    fn triggered_time_is_transient() {
        let mut h = harness();
        let (handler, _record) = Recorder::new();
        let id = h.engine.passive(DEV, FreqSet::new(), handler);
        assert_eq!(h.engine.get_triggered_time(DEV, id), None);

        h.start_head();
        h.ack_trigger();
        h.notify(Cmd::TriggerScan, vec![Attr::ScanStartTimeTsf(77)]);
        assert_eq!(h.engine.get_triggered_time(DEV, id), Some(77));

        h.scan_results_event();
        h.finish_dump();
        assert_eq!(h.engine.get_triggered_time(DEV, id), None);
    }

    #[test]
    fn no_cck_rates_excludes_b_rates() {
        let mut radio = FakeRadio::default();
        radio.rates_2g = Some(vec![2, 4, 11, 22, 12, 18, 24, 36]);
        let mut h = harness_with(Config::default(), radio, FakeKnownNetworks::default());

        let (handler, _record) = Recorder::new();
        let params = ScanParameters { no_cck_rates: true, ..Default::default() };
        h.engine.active_full(DEV, &params, handler);
        h.start_head();

        let cmd = h.last_sent();
        assert!(cmd.attrs.contains(&Attr::TxNoCckRate));
        let rates = cmd
            .attrs
            .iter()
            .find_map(|a| match a {
                Attr::ScanSuppRates(r) => Some(r.clone()),
                _ => None,
            })
            .expect("expected supported rates");
        assert_eq!(rates, vec![(Band::TwoGhz, vec![12, 18, 24, 36])]);
    }

    #[test]
    fn probe_ies_include_interworking_when_capable() {
        let mut radio = FakeRadio::default();
        // Extended Capabilities with the Interworking bit (31) set.
        radio.ext_capa = vec![0x7F, 0x04, 0x00, 0x00, 0x00, 0x80];
        let mut h = harness_with(Config::default(), radio, FakeKnownNetworks::default());

        let (handler, _record) = Recorder::new();
        let params = ScanParameters { extra_ie: vec![0xDD, 0x01, 0xAB], ..Default::default() };
        h.engine.active_full(DEV, &params, handler);
        h.start_head();

        let cmd = h.last_sent();
        let ies = cmd.ie().expect("expected probe IEs");
        #[rustfmt::skip]
        assert_eq!(
            ies,
            &[
                0x7F, 0x04, 0x00, 0x00, 0x00, 0x80, // Extended Capabilities
                0x6B, 0x01, 0x00,                   // Interworking
                0xDD, 0x01, 0xAB,                   // caller's extra element
            ][..]
        );
    }
}
