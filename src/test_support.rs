//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::cloudstack::{CloudStackError, Transport, TransportFuture};
use crate::orchestrator::{
    AgentIdentity, AgentIdentityEncoder, ControllerServices, EncodedIdentity, Machine,
    MachineRegistration, MachineState, OrchestratorError,
};

/// Scripted transport that returns pre-seeded bodies in FIFO order.
///
/// Every requested URL is recorded, so tests can assert on the commands and
/// parameters that reached the wire without opening a socket.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    responses: Arc<StdMutex<VecDeque<Result<String, CloudStackError>>>>,
    requests: Arc<StdMutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response by `delay`, widening race windows in
    /// concurrency tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a response body.
    pub fn push_body(&self, body: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(body.into()));
    }

    /// Queues a transport failure.
    pub fn push_transport_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(CloudStackError::Transport {
                message: message.into(),
            }));
    }

    /// Returns a snapshot of every URL requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the `command` parameter of every request, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|url| query_value(url, "command"))
            .collect()
    }

    /// Number of queued responses not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for ScriptedTransport {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(url.to_owned());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| {
                    Err(CloudStackError::Transport {
                        message: String::from("no scripted response available"),
                    })
                })
        })
    }
}

/// Returns the raw (still encoded) value of `name` in `url`'s query string.
#[must_use]
pub fn query_value(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Produces a `listVirtualMachines` response for `(id, state, addresses)`
/// triples.
#[must_use]
pub fn list_response(machines: &[(&str, &str, &[&str])]) -> String {
    if machines.is_empty() {
        return format!(
            r#"{XML_DECLARATION}<listvirtualmachinesresponse cloud-stack-version="4.2.0"/>"#
        );
    }
    let items: String = machines
        .iter()
        .map(|(id, state, addresses)| {
            let nics: String = addresses
                .iter()
                .enumerate()
                .map(|(index, address)| {
                    format!(
                        "<nic><id>{id}-nic-{index}</id><ipaddress>{}</ipaddress></nic>",
                        escape(address)
                    )
                })
                .collect();
            format!(
                "<virtualmachine><id>{}</id><name>{}</name><state>{}</state>{nics}</virtualmachine>",
                escape(id),
                escape(id),
                escape(state)
            )
        })
        .collect();
    format!(
        r#"{XML_DECLARATION}<listvirtualmachinesresponse cloud-stack-version="4.2.0"><count>{}</count>{items}</listvirtualmachinesresponse>"#,
        machines.len()
    )
}

/// Produces an error envelope carrying `text`.
#[must_use]
pub fn error_response(code: u16, text: &str) -> String {
    format!(
        r#"{XML_DECLARATION}<errorresponse cloud-stack-version="4.2.0"><errorcode>{code}</errorcode><cserrorcode>4350</cserrorcode><errortext>{}</errortext></errorresponse>"#,
        escape(text)
    )
}

/// Produces a `deployVirtualMachine` response.
#[must_use]
pub fn deploy_response(id: &str, job_id: &str) -> String {
    format!(
        r#"{XML_DECLARATION}<deployvirtualmachineresponse cloud-stack-version="4.2.0"><id>{}</id><jobid>{}</jobid></deployvirtualmachineresponse>"#,
        escape(id),
        escape(job_id)
    )
}

/// Produces an asynchronous job acknowledgement wrapped in `root`
/// (for example `rebootvirtualmachineresponse`).
#[must_use]
pub fn job_response(root: &str, job_id: &str) -> String {
    format!(
        r#"{XML_DECLARATION}<{root} cloud-stack-version="4.2.0"><jobid>{}</jobid></{root}>"#,
        escape(job_id)
    )
}

/// Identity encoder returning deterministic payloads.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentityEncoder {
    failure: Option<String>,
}

impl StaticIdentityEncoder {
    /// Encoder that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
        }
    }
}

impl AgentIdentityEncoder for StaticIdentityEncoder {
    fn encode(&self, identity: &AgentIdentity) -> Result<EncodedIdentity, OrchestratorError> {
        if let Some(message) = &self.failure {
            return Err(OrchestratorError::new(message.clone()));
        }
        Ok(EncodedIdentity {
            user_data: format!(
                "{}:{}:{}",
                identity.controller_host, identity.controller_port, identity.account_name
            ),
            host_identifier: format!("host-{}", identity.account_name),
        })
    }
}

/// Registration captured by [`RecordingControllerServices`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedRegistration {
    /// Remote instance id.
    pub server_id: String,
    /// Host identifier passed through from the encoder.
    pub host_identifier: String,
    /// Agent port passed with the registration.
    pub agent_port: u16,
}

/// Controller services double that records registrations.
#[derive(Clone, Debug)]
pub struct RecordingControllerServices {
    agent_port: u16,
    failure: Option<String>,
    registrations: Arc<StdMutex<Vec<RecordedRegistration>>>,
}

impl RecordingControllerServices {
    /// Services that accept every registration.
    #[must_use]
    pub fn new(agent_port: u16) -> Self {
        Self {
            agent_port,
            failure: None,
            registrations: Arc::default(),
        }
    }

    /// Services that reject every registration with `message`.
    #[must_use]
    pub fn failing(agent_port: u16, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(agent_port)
        }
    }

    /// Returns a snapshot of the registrations attempted so far.
    #[must_use]
    pub fn registrations(&self) -> Vec<RecordedRegistration> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ControllerServices for RecordingControllerServices {
    fn create_machine_instance(
        &self,
        registration: &MachineRegistration<'_>,
    ) -> Result<Machine, OrchestratorError> {
        let count = {
            let mut registrations = self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registrations.push(RecordedRegistration {
                server_id: registration.server_id.to_owned(),
                host_identifier: registration.host_identifier.to_owned(),
                agent_port: registration.agent_port,
            });
            registrations.len()
        };
        if let Some(message) = &self.failure {
            return Err(OrchestratorError::new(message.clone()));
        }
        Ok(Machine {
            id: format!("machine-{count}"),
            name: registration.server_id.to_owned(),
            ip_address: String::from("0.0.0.0"),
            state: MachineState::Starting,
            compute_center: registration.compute_center.clone(),
        })
    }

    fn default_agent_port(&self) -> u16 {
        self.agent_port
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets `pairs` and removes `cleared` while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)], cleared: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(cleared.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + cleared.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in cleared {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
