//! Statbot Core
//!
//! Polling pipeline: dedup, statistics, commands and auto-replies

pub mod commands;
pub mod dedup;
pub mod replies;

use anyhow::Result;
use chrono::Utc;
use commands::{CommandContext, CommandInterpreter};
use dedup::DedupCache;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statbot_config::{BotConfig, Config};
use statbot_ipc::{MessageSource, ObservedMessage, OutboundReply, ReplyActuator, ReplyKind};
use statbot_policy::PolicyEngine;
use statbot_storage::{LoadOutcome, SnapshotStore, StatsStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Timing and reply knobs taken from `[bot]`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub flush_interval: Duration,
    pub auto_reply: bool,
    pub reply_delay_min_ms: u64,
    pub reply_delay_max_ms: u64,
    pub max_inflight_replies: usize,
}

impl From<&BotConfig> for PipelineSettings {
    fn from(bot: &BotConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(bot.poll_interval_ms),
            flush_interval: Duration::from_secs(bot.flush_interval_secs),
            auto_reply: bot.auto_reply,
            reply_delay_min_ms: bot.reply_delay_min_ms,
            reply_delay_max_ms: bot.reply_delay_max_ms,
            max_inflight_replies: bot.max_inflight_replies.max(1),
        }
    }
}

/// What happened to one observed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    OwnMessage,
    Duplicate,
    Recorded {
        participant_id: String,
        reply: Option<OutboundReply>,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub observed: usize,
    pub recorded: usize,
    pub duplicates: usize,
    pub own: usize,
    pub replies: usize,
    pub poll_failed: bool,
}

pub struct StatbotRuntime {
    settings: PipelineSettings,
    bot_name: String,
    policy: PolicyEngine,
    interpreter: CommandInterpreter,
    store: StatsStore,
    dedup: DedupCache,
    snapshots: Box<dyn SnapshotStore>,
    source: Arc<dyn MessageSource>,
    actuator: Arc<dyn ReplyActuator>,
    reply_slots: Arc<Semaphore>,
    inflight: JoinSet<()>,
    rng: StdRng,
}

impl StatbotRuntime {
    /// Loads the snapshot (or starts empty) and writes a fresh one out when
    /// nothing usable was on disk.
    pub fn new(
        config: &Config,
        snapshots: Box<dyn SnapshotStore>,
        source: Arc<dyn MessageSource>,
        actuator: Arc<dyn ReplyActuator>,
    ) -> Self {
        let settings = PipelineSettings::from(&config.bot);
        let (store, outcome) = StatsStore::load_or_default(snapshots.as_ref(), Utc::now());
        match &outcome {
            LoadOutcome::Loaded => info!("Loaded statistics from {}", snapshots.describe()),
            LoadOutcome::Missing => info!(
                "No statistics at {}, starting empty",
                snapshots.describe()
            ),
            LoadOutcome::Unreadable(e) => warn!(
                "Statistics at {} are unreadable, starting empty: {:#}",
                snapshots.describe(),
                e
            ),
        }

        let mut runtime = Self {
            reply_slots: Arc::new(Semaphore::new(settings.max_inflight_replies)),
            settings,
            bot_name: config.bot.bot_name.clone(),
            policy: PolicyEngine::new(&config.bot),
            interpreter: CommandInterpreter::new(&config.bot.command_prefix, &config.bot.bot_name),
            store,
            dedup: DedupCache::new(),
            snapshots,
            source,
            actuator,
            inflight: JoinSet::new(),
            rng: StdRng::from_entropy(),
        };
        info!("{} admin(s) configured", runtime.policy.admin_count());
        if outcome.needs_initial_write() {
            runtime.persist("initial");
        }
        runtime
    }

    /// Replaces the reply RNG, for reproducible template and delay choice.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn store(&self) -> &StatsStore {
        &self.store
    }

    pub fn inflight_replies(&self) -> usize {
        self.inflight.len()
    }

    /// Connects the source, then polls until `shutdown` resolves.
    ///
    /// Ticks never overlap: each one is awaited inside the loop and missed
    /// ticks are skipped. Reply delivery runs outside the tick, with at most
    /// `max_inflight_replies` sends in flight.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "{} starting (source: {}, poll every {:?})",
            self.bot_name,
            self.source.name(),
            self.settings.poll_interval
        );

        if let Err(e) = self.source.connect().await {
            error!("Failed to connect {}: {:#}", self.source.name(), e);
            self.shutdown_sequence().await;
            return Err(e.context(format!("{} failed to start", self.source.name())));
        }
        info!("Connected to {}", self.source.name());

        let mut poll_interval = tokio::time::interval(self.settings.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let flush_every = self.settings.flush_interval;
        let mut flush_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + flush_every, flush_every);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = poll_interval.tick() => {
                    let report = self.tick().await;
                    if report.observed > 0 {
                        debug!("Tick: {:?}", report);
                    }
                }
                _ = flush_interval.tick() => {
                    self.flush_if_dirty("periodic");
                }
            }
        }

        self.shutdown_sequence().await;
        Ok(())
    }

    /// One poll cycle. Poll failures are logged and the tick is skipped.
    pub async fn tick(&mut self) -> TickReport {
        self.reap_finished_replies();

        let mut report = TickReport::default();
        let batch = match self.source.poll().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Polling {} failed: {:#}", self.source.name(), e);
                report.poll_failed = true;
                return report;
            }
        };

        report.observed = batch.len();
        for message in batch {
            match self.ingest(message) {
                Disposition::OwnMessage => report.own += 1,
                Disposition::Duplicate => report.duplicates += 1,
                Disposition::Recorded { reply, .. } => {
                    report.recorded += 1;
                    if let Some(reply) = reply {
                        report.replies += 1;
                        self.dispatch(reply);
                    }
                }
            }
        }
        report
    }

    /// Applies one observation to the store and decides the reply, if any.
    ///
    /// Direct conversations with auto-reply on always get a canned reply,
    /// even for prefixed text. Everywhere else prefixed text runs a command.
    pub fn ingest(&mut self, message: ObservedMessage) -> Disposition {
        if self.policy.is_own_message(&message.sender_display_name) {
            return Disposition::OwnMessage;
        }
        if !self.dedup.insert(message.fingerprint()) {
            return Disposition::Duplicate;
        }

        let participant_id = self
            .policy
            .participant_id(message.sender_id.as_deref(), &message.sender_display_name);
        let count = self.store.record_message(
            &message.conversation_id,
            &participant_id,
            &message.sender_display_name,
            message.is_group,
        );
        debug!(
            "Recorded message from {} in {} (#{})",
            participant_id, message.conversation_id, count
        );

        let reply = if !message.is_group && self.settings.auto_reply {
            Some(OutboundReply::auto(
                &message.conversation_id,
                replies::pick_auto_reply(
                    &mut self.rng,
                    &self.bot_name,
                    &message.sender_display_name,
                    self.interpreter.prefix(),
                ),
            ))
        } else if let Some(command) = self.interpreter.parse(&message.text) {
            info!(
                "Command {} from {} in {}",
                command.name(),
                participant_id,
                message.conversation_id
            );
            let response = self.interpreter.execute(
                &command,
                CommandContext {
                    conversation_id: &message.conversation_id,
                    requester_id: &participant_id,
                },
                &mut self.store,
                &self.policy,
            );
            if response.persist_now {
                self.persist(command.name());
            }
            Some(OutboundReply::command(&message.conversation_id, response.text))
        } else {
            None
        };

        Disposition::Recorded {
            participant_id,
            reply,
        }
    }

    fn dispatch(&mut self, reply: OutboundReply) {
        let delay = match reply.kind {
            ReplyKind::AutoReply => replies::reply_delay(
                &mut self.rng,
                self.settings.reply_delay_min_ms,
                self.settings.reply_delay_max_ms,
            ),
            ReplyKind::CommandResponse => Duration::ZERO,
        };
        let actuator = Arc::clone(&self.actuator);
        let slots = Arc::clone(&self.reply_slots);

        // Slots bound concurrent sends only; the typing delay runs unpermitted.
        self.inflight.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Reply slots closed: {}", e);
                    return;
                }
            };
            if !actuator
                .deliver(&reply.conversation_id, &reply.text)
                .await
            {
                warn!("Reply to {} was not delivered", reply.conversation_id);
            }
        });
    }

    fn reap_finished_replies(&mut self) {
        while let Some(result) = self.inflight.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Reply task panicked: {}", e);
                }
            }
        }
    }

    /// Writes only when something changed since the last write.
    pub fn flush_if_dirty(&mut self, reason: &str) {
        if self.store.is_dirty() {
            self.persist(reason);
        }
    }

    fn persist(&mut self, reason: &str) {
        match self.store.flush(self.snapshots.as_ref()) {
            Ok(()) => debug!("Saved statistics ({})", reason),
            Err(e) => error!(
                "Saving statistics to {} failed ({}): {:#}",
                self.snapshots.describe(),
                reason,
                e
            ),
        }
    }

    /// Final flush, then release the session. Pending replies are detached.
    async fn shutdown_sequence(&mut self) {
        self.persist("shutdown");
        if let Err(e) = self.source.release().await {
            warn!("Releasing {} failed: {:#}", self.source.name(), e);
        }
        let pending = self.inflight.len();
        if pending > 0 {
            info!("Leaving {} reply deliveries unfinished", pending);
        }
        self.inflight.detach_all();
        info!("{} stopped", self.bot_name);
    }
}
