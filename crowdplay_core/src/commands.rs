//! Chat command parsing and the command facade.
//!
//! The facade is the only way to create or end sessions. Every operation
//! returns the body of its notice; [`CommandFacade::dispatch`] turns a raw
//! chat line into exactly one notice (or none, for callers without rights).

use crate::catalog::Environment;
use crate::checkpoint::CheckpointKey;
use crate::controller::{SessionController, FORCE_STOP_NOTICE};
use crate::error::{CheckpointError, CommandError};
use crate::services::Services;
use crate::session::{SessionHandle, SessionRequest};
use crowdplay_env::{Action, BallotTransport, CallerId, EnvError, SessionContext, SessionId};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, Instrument};

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { environment: Option<String> },
    Stop,
    ForceStop,
    Save,
    Load { environment: Option<String> },
    Read { address: u16 },
    Write { address: u16, value: u8 },
    List,
    Controls,
    Sessions,
    Help,
}

impl Command {
    /// Parses one chat line.
    ///
    /// Returns `None` if the line does not start with `prefix`. Command
    /// names are case-insensitive; addresses and values are hexadecimal
    /// with an optional `0x` prefix.
    pub fn parse(prefix: &str, line: &str) -> Option<Result<Command, CommandError>> {
        let body = line.trim().strip_prefix(prefix)?;
        let mut words = body.split_whitespace();
        let name = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        Some(Self::from_parts(&name, &args))
    }

    fn from_parts(name: &str, args: &[&str]) -> Result<Command, CommandError> {
        let environment = args.first().map(|s| s.to_lowercase());

        match name {
            "start" => Ok(Command::Start { environment }),
            "stop" => Ok(Command::Stop),
            "forcestop" => Ok(Command::ForceStop),
            "save" => Ok(Command::Save),
            "load" => Ok(Command::Load { environment }),
            "read" => match args {
                [address] => Ok(Command::Read {
                    address: parse_address(address)?,
                }),
                _ => Err(CommandError::Usage("read <address>")),
            },
            "write" => match args {
                [address, value] => Ok(Command::Write {
                    address: parse_address(address)?,
                    value: parse_value(value)?,
                }),
                _ => Err(CommandError::Usage("write <address> <value>")),
            },
            "list" => Ok(Command::List),
            "controls" => Ok(Command::Controls),
            "sessions" => Ok(Command::Sessions),
            "help" => Ok(Command::Help),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

fn strip_hex(text: &str) -> Option<&str> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(digits)
}

/// Parses a 16-bit hexadecimal address.
pub fn parse_address(text: &str) -> Result<u16, CommandError> {
    strip_hex(text)
        .and_then(|d| u16::from_str_radix(d, 16).ok())
        .ok_or_else(|| CommandError::MalformedAddress(text.to_string()))
}

/// Parses an 8-bit hexadecimal value.
pub fn parse_value(text: &str) -> Result<u8, CommandError> {
    strip_hex(text)
        .and_then(|d| u8::from_str_radix(d, 16).ok())
        .ok_or_else(|| CommandError::MalformedValue(text.to_string()))
}

/// Entry point for chat commands.
pub struct CommandFacade<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    services: Arc<Services<Ctx, T>>,
}

impl<Ctx, T> Clone for CommandFacade<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
        }
    }
}

impl<Ctx, T> CommandFacade<Ctx, T>
where
    Ctx: SessionContext,
    T: BallotTransport,
{
    pub fn new(services: Arc<Services<Ctx, T>>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services<Ctx, T>> {
        &self.services
    }

    /// Parses and runs one chat line, then sends its notice.
    ///
    /// Returns the notice that was sent. Lines without the prefix, unknown
    /// commands, commands from unauthorized callers and an accepted `stop`
    /// (whose session reports its own exit) produce nothing.
    pub async fn dispatch(&self, caller: CallerId, session: SessionId, line: &str) -> Option<String> {
        let parsed = Command::parse(&self.services.config.command_prefix, line)?;

        let outcome = match parsed {
            Ok(command) => self.execute(caller, session, command).await,
            Err(CommandError::UnknownCommand(name)) => {
                debug!(%session, %caller, %name, "ignoring unknown command");
                return None;
            }
            Err(err) => self.authorize(session, caller).await.and(Err(err)),
        };

        let text = match outcome {
            Ok(Some(body)) => format!("> ✅ {}", body),
            Ok(None) => return None,
            Err(CommandError::Unauthorized) => {
                debug!(%session, %caller, line, "ignoring unauthorized command");
                return None;
            }
            Err(err) => format!("> ⛔ {}", err),
        };

        self.services.notice(session, &text).await;
        Some(text)
    }

    /// Runs a parsed command and returns the body of its notice, if it
    /// has one.
    pub async fn execute(
        &self,
        caller: CallerId,
        session: SessionId,
        command: Command,
    ) -> Result<Option<String>, CommandError> {
        let body = match command {
            Command::Start { environment } => self.start(caller, session, environment.as_deref()).await?,
            Command::Stop => {
                self.stop(caller, session).await?;
                return Ok(None);
            }
            Command::ForceStop => self.force_stop(caller, session).await?,
            Command::Save => self.save(caller, session).await?,
            Command::Load { environment } => self.load(caller, session, environment.as_deref()).await?,
            Command::Read { address } => self.read_memory(caller, session, address).await?,
            Command::Write { address, value } => {
                self.write_memory(caller, session, address, value).await?
            }
            Command::List => self.list(caller, session).await?,
            Command::Controls => self.controls(),
            Command::Sessions => self.sessions(caller, session).await?,
            Command::Help => self.help(),
        };
        Ok(Some(body))
    }

    async fn authorize(&self, session: SessionId, caller: CallerId) -> Result<(), CommandError> {
        let level = self
            .services
            .transport
            .authorization_level(session, caller)
            .await
            .map_err(CommandError::Transport)?;

        if level.may_command() {
            Ok(())
        } else {
            Err(CommandError::Unauthorized)
        }
    }

    fn environment(&self, name: Option<&str>) -> Result<Environment, CommandError> {
        let name = name.unwrap_or(&self.services.config.default_environment);
        self.services
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnknownEnvironment(name.to_string()))
    }

    /// Starts `environment` (or the default) from its default checkpoint.
    pub async fn start(
        &self,
        caller: CallerId,
        session: SessionId,
        environment: Option<&str>,
    ) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let env = self.environment(environment)?;
        if self.services.registry.contains(session) {
            return Err(CommandError::AlreadyActive);
        }

        let blob = env.read_default_checkpoint().map_err(|e| {
            CommandError::Launch(EnvError::engine(format!(
                "default checkpoint {} unreadable: {}",
                env.default_checkpoint.display(),
                e
            )))
        })?;
        self.launch(session, &env, blob).await?;

        Ok(format!("starting '{}'!", env.name.to_uppercase()))
    }

    /// Restarts `environment` (or the default) from this session's saved
    /// checkpoint.
    pub async fn load(
        &self,
        caller: CallerId,
        session: SessionId,
        environment: Option<&str>,
    ) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let env = self.environment(environment)?;
        if self.services.registry.contains(session) {
            return Err(CommandError::LoadWhileActive);
        }

        let key = CheckpointKey::new(&env.name, session);
        let blob = self.services.store.load(&key).map_err(|e| match e {
            CheckpointError::NotFound(_) => CommandError::NoCheckpoint,
            other => CommandError::Persistence(other),
        })?;
        self.launch(session, &env, blob).await?;

        Ok(format!("loaded '{}' from the last save!", env.name.to_uppercase()))
    }

    /// Boots an engine on `blob`, registers the session and spawns its
    /// controller.
    async fn launch(
        &self,
        session: SessionId,
        env: &Environment,
        blob: Vec<u8>,
    ) -> Result<(), CommandError> {
        let services = &self.services;

        let mut engine = services.factory.launch(&env.rom).map_err(CommandError::Launch)?;
        engine.set_realtime_throttle(false);
        engine.deserialize_state(&blob).map_err(CommandError::Launch)?;

        let (handle, requests) = SessionHandle::new(session, &env.name, services.ctx.now());
        let handle = Arc::new(handle);
        // A concurrent start may have won since the check; the engine is dropped
        services.registry.register(handle.clone())?;

        let controller =
            SessionController::new(services.clone(), handle, requests, engine, env, blob);
        let span = info_span!("session", id = %session, env = %env.name);
        services.ctx.spawn(
            &format!("session-{}", session),
            async move {
                controller.run().await;
            }
            .instrument(span),
        );

        info!(%session, env = %env.name, active = services.registry.len(), "session launched");
        services.announce_presence().await;
        Ok(())
    }

    /// Requests a graceful stop; the session flushes its checkpoint and
    /// sends the only notice when it exits.
    pub async fn stop(&self, caller: CallerId, session: SessionId) -> Result<(), CommandError> {
        self.authorize(session, caller).await?;
        let handle = self.services.registry.lookup(session)?;
        if !handle.request_stop() {
            return Err(CommandError::NotActive);
        }
        info!(%session, "stop requested");
        Ok(())
    }

    /// Ends a session immediately without flushing its checkpoint.
    pub async fn force_stop(
        &self,
        caller: CallerId,
        session: SessionId,
    ) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let handle = self.services.registry.lookup(session)?;
        // A controller already tearing down owns the terminal notice
        if !handle.claim_exit() {
            return Err(CommandError::NotActive);
        }
        self.services.registry.unregister_exact(&handle);
        handle.kill();

        info!(%session, "session force stopped");
        self.services.announce_presence().await;
        Ok(FORCE_STOP_NOTICE.to_string())
    }

    /// Persists the session's current checkpoint buffer.
    pub async fn save(&self, caller: CallerId, session: SessionId) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let (reply, response) = oneshot::channel();
        self.request(session, SessionRequest::Save { reply }).await?;
        response.await.map_err(|_| CommandError::NotActive)??;
        Ok("saved state!".to_string())
    }

    pub async fn read_memory(
        &self,
        caller: CallerId,
        session: SessionId,
        address: u16,
    ) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let (reply, response) = oneshot::channel();
        self.request(session, SessionRequest::ReadMemory { address, reply })
            .await?;
        let value = response
            .await
            .map_err(|_| CommandError::NotActive)?
            .map_err(CommandError::Memory)?;
        Ok(format!("{:#06x} = {:#04x}", address, value))
    }

    pub async fn write_memory(
        &self,
        caller: CallerId,
        session: SessionId,
        address: u16,
        value: u8,
    ) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let (reply, response) = oneshot::channel();
        self.request(session, SessionRequest::WriteMemory { address, value, reply })
            .await?;
        response
            .await
            .map_err(|_| CommandError::NotActive)?
            .map_err(CommandError::Memory)?;
        Ok(format!("wrote {:#04x} to {:#06x}", value, address))
    }

    async fn request(&self, session: SessionId, request: SessionRequest) -> Result<(), CommandError> {
        let handle = self.services.registry.lookup(session)?;
        handle
            .send(request)
            .await
            .map_err(|_| CommandError::NotActive)
    }

    /// Names of every playable environment.
    pub async fn list(&self, caller: CallerId, session: SessionId) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let names: Vec<&str> = self.services.catalog.iter().map(|e| e.name.as_str()).collect();
        Ok(format!("available games: {}", names.join(", ")))
    }

    /// The vote menu legend.
    pub fn controls(&self) -> String {
        let lines: Vec<String> = Action::MENU
            .iter()
            .map(|a| format!("{} {}", a.glyph(), a.label()))
            .collect();
        format!("controls:\n{}", lines.join("\n"))
    }

    /// Every active session with its status and uptime.
    pub async fn sessions(&self, caller: CallerId, session: SessionId) -> Result<String, CommandError> {
        self.authorize(session, caller).await?;
        let handles = self.services.registry.handles();
        if handles.is_empty() {
            return Ok("no games are running.".to_string());
        }

        let now = self.services.ctx.now();
        let lines: Vec<String> = handles
            .iter()
            .map(|h| {
                let uptime = now.saturating_sub(h.started_at()).as_secs();
                format!("{} {} {} {}s", h.id(), h.environment(), h.status(), uptime)
            })
            .collect();
        Ok(format!("{} active:\n{}", handles.len(), lines.join("\n")))
    }

    pub fn help(&self) -> String {
        let p = &self.services.config.command_prefix;
        format!(
            "commands: {p}start [game], {p}stop, {p}forcestop, {p}save, {p}load [game], \
             {p}read <address>, {p}write <address> <value>, {p}list, {p}controls, {p}sessions"
        )
    }
}
