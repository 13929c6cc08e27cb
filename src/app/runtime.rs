//! Runs effects off-thread and feeds their outcomes back as messages.

use super::{update, Effect, FormInstance, FormMsg, NoticeLevel};
use crate::services::cli_runner::SubmitTransport;
use crate::services::validator::SchemaValidator;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub level: NoticeLevel,
}

pub struct FormRuntime {
    form: FormInstance,
    validator: Arc<dyn SchemaValidator>,
    transport: Option<Arc<dyn SubmitTransport>>,
    tx: Sender<FormMsg>,
    rx: Receiver<FormMsg>,
    notices: Vec<Notice>,
}

impl FormRuntime {
    pub fn new(form: FormInstance, validator: Arc<dyn SchemaValidator>) -> Self {
        let (tx, rx) = mpsc::channel::<FormMsg>();
        Self {
            form,
            validator,
            transport: None,
            tx,
            rx,
            notices: Vec::new(),
        }
    }

    /// Without a transport a validated submission succeeds locally.
    pub fn with_transport(mut self, transport: Arc<dyn SubmitTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn form(&self) -> &FormInstance {
        &self.form
    }

    /// For messages produced outside the runtime (input threads, timers).
    pub fn sender(&self) -> Sender<FormMsg> {
        self.tx.clone()
    }

    pub fn dispatch(&mut self, msg: FormMsg) {
        let effects = update(&mut self.form, msg);
        self.run_effects(effects);
    }

    /// Apply every message that has arrived. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut drained: Vec<FormMsg> = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            drained.push(msg);
        }
        let n = drained.len();
        for msg in drained {
            self.dispatch(msg);
        }
        n
    }

    /// Block until no submission is in flight, or `timeout` elapses.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.form.is_submitting() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(msg) => self.dispatch(msg),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    pub fn tick(&mut self) {
        self.dispatch(FormMsg::Tick(Instant::now()));
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for eff in effects {
            match eff {
                Effect::Validate { ticket, input } => {
                    let validator = Arc::clone(&self.validator);
                    let tx = self.tx.clone();
                    thread::spawn(move || {
                        let outcome = validator.validate(&input);
                        let _ = tx.send(FormMsg::Validated { ticket, outcome });
                    });
                }
                Effect::Transmit { ticket, payload } => match &self.transport {
                    Some(transport) => {
                        let transport = Arc::clone(transport);
                        let tx = self.tx.clone();
                        thread::spawn(move || {
                            let outcome = transport.submit(&payload);
                            let _ = tx.send(FormMsg::Transmitted { ticket, outcome });
                        });
                    }
                    None => {
                        let _ = self.tx.send(FormMsg::Transmitted {
                            ticket,
                            outcome: Ok(serde_json::Value::Null),
                        });
                    }
                },
                Effect::Notify { text, level } => {
                    match level {
                        NoticeLevel::Info => tracing::info!("{text}"),
                        NoticeLevel::Warn => tracing::warn!("{text}"),
                        NoticeLevel::Error => tracing::error!("{text}"),
                    }
                    self.notices.push(Notice { text, level });
                }
            }
        }
    }
}

impl Drop for FormRuntime {
    fn drop(&mut self) {
        self.form.dispose();
    }
}
