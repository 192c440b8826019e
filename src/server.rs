//! Environment server lifecycle helpers.
//!
//! Spawning the server, polling it until it accepts connections, and measuring round-trip
//! latency. The server is an external program; nothing here knows about its rules.

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{debug, info, instrument, warn};

use crate::client::RpcClient;
use crate::configuration::Configuration;
use crate::transport::{Transport, WsTransport};

/// How to launch an environment server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub(crate) env_type: String,
    pub(crate) port: u16,
    pub(crate) verbose: bool,
    pub(crate) agents: Option<u32>,
    pub(crate) decks: Option<u32>,
    pub(crate) seed: Option<u64>,
    pub(crate) program: String,
    pub(crate) base_args: Vec<String>,
    pub(crate) start_timeout: Duration,
}

impl ServerSettings {
    /// Default settings: a blackjack server on port 9999, started with
    /// `npx tsx bridge/server.ts`, given 30 seconds to come up.
    pub fn new() -> Self {
        Self {
            env_type: "blackjack".to_string(),
            port: 9999,
            verbose: false,
            agents: None,
            decks: None,
            seed: None,
            program: "npx".to_string(),
            base_args: vec!["tsx".to_string(), "bridge/server.ts".to_string()],
            start_timeout: Duration::from_secs(30),
        }
    }

    /// Set the environment type hosted by the server.
    pub fn with_env_type(mut self, env_type: impl Into<String>) -> Self {
        self.env_type = env_type.into();
        self
    }

    /// Set the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Let the server log to the inherited stdout and stderr.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the number of agents.
    pub fn with_agents(mut self, agents: u32) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Set the number of decks.
    pub fn with_decks(mut self, decks: u32) -> Self {
        self.decks = Some(decks);
        self
    }

    /// Set the server-side seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replace the launched program and the arguments placed before the server options.
    pub fn with_program(mut self, program: impl Into<String>, base_args: Vec<String>) -> Self {
        self.program = program.into();
        self.base_args = base_args;
        self
    }

    /// Set how long the server may take to accept connections.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// WebSocket URL clients should connect to.
    pub fn address(&self) -> String {
        format!("ws://localhost:{}", self.port)
    }

    /// Arguments passed to the program.
    pub fn command_line(&self) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "--env".to_string(),
            self.env_type.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ]);
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(agents) = self.agents {
            args.extend(["--agents".to_string(), agents.to_string()]);
        }
        if let Some(decks) = self.decks {
            args.extend(["--decks".to_string(), decks.to_string()]);
        }
        if let Some(seed) = self.seed {
            args.extend(["--seed".to_string(), seed.to_string()]);
        }
        args
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `address` until it completes a WebSocket handshake or `timeout` elapses.
pub fn wait_for_server(address: &str, timeout: Duration, poll_interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut transport = WsTransport::new(address, poll_interval);
    loop {
        if transport.connect().is_ok() {
            transport.close();
            return true;
        }
        if Instant::now() + poll_interval > deadline {
            return false;
        }
        thread::sleep(poll_interval);
    }
}

/// A running environment server. The process is killed on drop.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    address: String,
    stopped: bool,
}

impl ServerProcess {
    /// Launch the server and wait until it accepts connections.
    ///
    /// The process is killed if it does not become reachable within the start timeout.
    #[instrument(skip_all, fields(port = settings.port))]
    pub fn start(settings: &ServerSettings) -> anyhow::Result<Self> {
        let args = settings.command_line();
        let mut cmd = Command::new(&settings.program);
        cmd.args(&args).stdin(Stdio::null());
        if !settings.verbose {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("command '{}' not found", settings.program))?;
        debug!(pid = child.id(), ?args, "server process spawned");

        let mut process = Self {
            child,
            address: settings.address(),
            stopped: false,
        };

        // at least 10 tries
        let poll_interval = Duration::from_millis(500).min(settings.start_timeout / 10);
        if !wait_for_server(&process.address, settings.start_timeout, poll_interval) {
            let status = process.child.try_wait().ok().flatten();
            process.stop()?;
            match status {
                Some(status) => bail!("server exited during startup ({status})"),
                None => bail!(
                    "server failed to start within {:?}",
                    settings.start_timeout
                ),
            }
        }
        info!(address = %process.address, "server ready");
        Ok(process)
    }

    /// Address clients should connect to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// OS identifier of the server process.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Kill the server and reap it. Idempotent.
    pub fn stop(&mut self) -> anyhow::Result<()> {
        if self.stopped {
            return Ok(());
        }
        if self
            .child
            .try_wait()
            .context("could not query server process")?
            .is_none()
        {
            self.child.kill().context("could not kill server process")?;
        }
        self.child.wait().context("could not reap server process")?;
        self.stopped = true;
        debug!(address = %self.address, "server stopped");
        Ok(())
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("could not stop server process {}: {e:#}", self.child.id());
        }
    }
}

/// Round-trip latency statistics collected with `ping`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Fastest round trip
    pub min: Duration,
    /// Slowest round trip
    pub max: Duration,
    /// Average round trip
    pub mean: Duration,
    /// Median round trip
    pub median: Duration,
    /// Number of pings
    pub samples: usize,
}

impl LatencyStats {
    fn from_samples(mut latencies: Vec<Duration>) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort();
        let samples = latencies.len();
        let total: Duration = latencies.iter().sum();
        let median = if samples % 2 == 0 {
            (latencies[samples / 2 - 1] + latencies[samples / 2]) / 2
        } else {
            latencies[samples / 2]
        };
        Some(Self {
            min: latencies[0],
            max: latencies[samples - 1],
            mean: total / samples as u32,
            median,
            samples,
        })
    }
}

/// Connect to `address`, send `samples` pings and summarize their round-trip times.
pub fn measure_latency(address: &str, samples: usize) -> anyhow::Result<LatencyStats> {
    if samples == 0 {
        bail!("at least one sample is needed");
    }
    let mut client = RpcClient::new(WsTransport::new(address, Configuration::DEFAULT_TIMEOUT));
    client
        .connect()
        .with_context(|| format!("could not connect to {address}"))?;

    let mut latencies = Vec::with_capacity(samples);
    for _ in 0..samples {
        latencies.push(client.ping().context("ping failed")?);
    }
    client.disconnect();

    LatencyStats::from_samples(latencies).context("no latency sample collected")
}
