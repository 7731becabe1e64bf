//! Registration state and the automatic-registration supervisor.
//!
//! The daemon keeps the modem attached: an explicit automatic registration
//! is fired on unlock/power-on/timeout changes, a timer ticks while the
//! modem is not yet home, and on expiry one explicit network scan is issued
//! before registration is retried without a timeout. Serving-system
//! indications keep the cached state current.

use tokio::sync::oneshot;

use crate::protocol::RegistrationInfo;
use crate::qmi::nas;

pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u32 = 60;

/// The supervisor advances in steps of at most this many seconds, so ongoing
/// attempts keep producing log lines.
pub const REGISTRATION_TIMEOUT_STEP_SECS: u32 = 10;

/// Smallest accepted registration timeout.
pub const MIN_REGISTRATION_TIMEOUT_SECS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationStatus {
    #[default]
    Idle,
    Searching,
    Home,
    Roaming,
    /// Transient, set only while the supervisor has an in-flight explicit
    /// scan; shadows Idle/Searching reported by the modem.
    Scanning,
}

impl RegistrationStatus {
    pub fn is_registered(self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

impl From<RegistrationStatus> for u32 {
    fn from(v: RegistrationStatus) -> Self {
        match v {
            RegistrationStatus::Idle => 0,
            RegistrationStatus::Searching => 1,
            RegistrationStatus::Home => 2,
            RegistrationStatus::Roaming => 3,
            RegistrationStatus::Scanning => 4,
        }
    }
}

/// Cached registration state, updated from serving-system reports.
#[derive(Debug, Clone, Default)]
pub struct RegistrationState {
    pub status: RegistrationStatus,
    pub operator_description: Option<String>,
    pub operator_mcc: u16,
    pub operator_mnc: u16,
    pub lac: u16,
    pub cid: u32,
    pub timeout_secs: u32,
}

impl RegistrationState {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_REGISTRATION_TIMEOUT_SECS,
            ..Self::default()
        }
    }

    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            status: self.status,
            operator_description: self.operator_description.clone().unwrap_or_default(),
            operator_mcc: u32::from(self.operator_mcc),
            operator_mnc: u32::from(self.operator_mnc),
            lac: u32::from(self.lac),
            cid: self.cid,
        }
    }

    /// Folds a serving-system report into the cached state. Returns true when
    /// the state just entered Home or Roaming (the supervisor timer is then
    /// cancelled by the caller).
    pub fn apply_serving_system(&mut self, report: &nas::ServingSystem) -> bool {
        let mut entered_registered = false;

        match report.registration_state {
            nas::RegistrationState::Registered => {
                self.status = match report.roaming {
                    Some(nas::RoamingIndicator::On) => RegistrationStatus::Roaming,
                    _ => RegistrationStatus::Home,
                };
                entered_registered = true;
            }
            nas::RegistrationState::NotRegisteredSearching => {
                if self.status != RegistrationStatus::Scanning {
                    self.status = RegistrationStatus::Searching;
                }
            }
            _ => {
                if self.status != RegistrationStatus::Scanning {
                    self.status = RegistrationStatus::Idle;
                }
            }
        }

        if self.status.is_registered() {
            if let Some(plmn) = &report.plmn {
                self.operator_mcc = plmn.mcc;
                self.operator_mnc = plmn.mnc;
                if let Some(description) = &plmn.description {
                    self.operator_description = Some(description.clone());
                }
            }
        } else {
            self.operator_description = None;
        }

        if let Some(lac) = report.lac {
            self.lac = lac;
        }
        if let Some(cid) = report.cid {
            self.cid = cid;
        }

        entered_registered
    }
}

/// Bookkeeping of one armed supervisor run.
#[derive(Debug)]
pub struct RegistrationContext {
    pub timeout_secs: u32,
    pub ongoing_secs: u32,
    /// Cancels the in-flight explicit scan, discarding its reply.
    pub scan_cancel: Option<oneshot::Sender<()>>,
}

/// The supervisor's control block. Timer tasks carry the generation they were
/// spawned under and exit when it moved on.
#[derive(Debug, Default)]
pub struct RegistrationController {
    context: Option<RegistrationContext>,
    generation: u64,
}

impl RegistrationController {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.context.is_some()
    }

    /// Cancels any armed run and in-flight scan. When a scan was shadowing
    /// the modem state, the status collapses back to Idle.
    pub fn cancel(&mut self, state: &mut RegistrationState) {
        self.generation += 1;
        if let Some(context) = self.context.take() {
            if let Some(cancel) = context.scan_cancel {
                let _ = cancel.send(());
                if state.status == RegistrationStatus::Scanning {
                    state.status = RegistrationStatus::Idle;
                }
            }
        }
    }

    /// Arms a new run with the given timeout; returns its generation.
    pub fn start(&mut self, timeout_secs: u32) -> u64 {
        self.generation += 1;
        self.context = Some(RegistrationContext {
            timeout_secs,
            ongoing_secs: 0,
            scan_cancel: None,
        });
        self.generation
    }

    /// Advances the armed run. Returns the next tick length in seconds, or
    /// None once the timeout expired (time to scan).
    pub fn next_tick(&mut self) -> Option<u32> {
        let context = self.context.as_mut()?;
        if context.timeout_secs > context.ongoing_secs {
            let next = REGISTRATION_TIMEOUT_STEP_SECS
                .min(context.timeout_secs - context.ongoing_secs);
            context.ongoing_secs += next;
            return Some(next);
        }
        None
    }

    pub fn ongoing_secs(&self) -> u32 {
        self.context.as_ref().map(|c| c.ongoing_secs).unwrap_or(0)
    }

    /// Stores the cancellation handle of the scan just launched.
    pub fn scan_started(&mut self, cancel: oneshot::Sender<()>) {
        if let Some(context) = self.context.as_mut() {
            context.scan_cancel = Some(cancel);
        }
    }

    /// Tears down the run after a scan completed; the caller re-enters
    /// registration without a timeout.
    pub fn finish(&mut self, state: &mut RegistrationState) {
        self.generation += 1;
        if self.context.take().is_some() && state.status == RegistrationStatus::Scanning {
            state.status = RegistrationStatus::Idle;
        }
    }
}
