use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time;
use tracing::{info, warn};

use common::config::{AutomationConfig, StepPolicy};

use crate::error::FailureReason;
use crate::host::{ActionDescriptor, HostEvent};
use crate::lifecycle::HostHandle;
use crate::observe::{Observation, await_event, await_observable};
use crate::provider::{ActionProvider, OrderField};
use crate::reporter::SessionReporter;
use crate::session::{ExecutionSession, SessionOutcome, Step, TradeResult};

/// Drives one session through Initializing, Authenticating, LocatingInstrument,
/// ExecutingTrades and Reporting against a host it does not trust.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    config: AutomationConfig,
}

impl StepExecutor {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }

    pub fn session_timeout(&self) -> Duration {
        self.config.session_timeout
    }

    /// Runs the session to a terminal outcome. Cancellation and the global session timeout
    /// abort whatever step is in flight. The terminal status event is emitted here.
    pub async fn execute(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &mut SessionReporter,
        cancel: watch::Receiver<bool>,
    ) -> SessionOutcome {
        let deadline = time::Instant::now() + self.config.session_timeout;
        self.execute_until(session, handle, provider, reporter, cancel, deadline)
            .await
    }

    /// `execute` against a deadline the caller started earlier, e.g. before host acquisition.
    pub async fn execute_until(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &mut SessionReporter,
        mut cancel: watch::Receiver<bool>,
        deadline: time::Instant,
    ) -> SessionOutcome {
        session.host_id = Some(handle.id());
        info!(
            "Session {} started: {} {} x{} on host {}",
            session.id,
            session.config.instrument,
            session.direction,
            session.config.order_count,
            handle.id()
        );

        let result = tokio::select! {
            result = self.run_steps(session, handle, provider, reporter) => result,
            _ = cancelled(&mut cancel) => Err(FailureReason::Cancelled),
            _ = time::sleep_until(deadline) => Err(FailureReason::SessionTimeout),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(
                    "Session {} aborted during {}: {}",
                    session.id, session.current_step, reason
                );
                SessionOutcome::Failed {
                    reason,
                    trades_submitted: session.trades_submitted,
                }
            }
        };

        session.enter(Step::Reporting);
        reporter.progress(Step::Reporting, outcome.to_string());
        reporter.finish(&outcome);
        session.outcome = outcome.clone();
        outcome
    }

    async fn run_steps(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &SessionReporter,
    ) -> Result<SessionOutcome, FailureReason> {
        let mut events = handle.subscribe();

        self.initialize(session, handle, provider, reporter, &mut events)
            .await?;
        self.authenticate(session, handle, provider, reporter, &mut events)
            .await?;
        self.locate_instrument(session, handle, provider, reporter, &mut events)
            .await?;
        Ok(self
            .execute_trades(session, handle, provider, reporter, &mut events)
            .await)
    }

    async fn initialize(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &SessionReporter,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> Result<(), FailureReason> {
        session.enter(Step::Initializing);
        session.add_attempts(Step::Initializing, 1);
        reporter.progress(Step::Initializing, format!("Loading {}", provider.platform()));

        handle.load(provider.target()).await?;
        let ready = await_event(handle.id(), events, self.config.host_load_timeout, |e| {
            matches!(e, HostEvent::Ready)
        })
        .await?;

        if !ready {
            return Err(FailureReason::HostLoadTimeout);
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &SessionReporter,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> Result<(), FailureReason> {
        session.enter(Step::Authenticating);
        reporter.progress(
            Step::Authenticating,
            format!("Logging in as {}", session.config.account.login),
        );

        handle.instruct_all(provider.clear_session()).await?;
        handle
            .instruct_all(provider.authenticate(&session.config.account))
            .await?;

        let observation = self
            .verify(
                session,
                Step::Authenticating,
                handle,
                events,
                &provider.authenticated_probe(),
                &self.config.authenticate,
            )
            .await?;
        if !observation.is_observed() {
            return Err(FailureReason::AuthVerificationTimeout);
        }
        reporter.progress(Step::Authenticating, "Login verified");
        Ok(())
    }

    async fn locate_instrument(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &SessionReporter,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> Result<(), FailureReason> {
        session.enter(Step::LocatingInstrument);
        let instrument = session.config.instrument.clone();
        let probe = provider.instrument_selected_probe(&instrument);
        reporter.progress(
            Step::LocatingInstrument,
            format!("Searching for {}", instrument),
        );

        handle
            .instruct_all(provider.locate_instrument(&instrument))
            .await?;
        let observation = self
            .verify(
                session,
                Step::LocatingInstrument,
                handle,
                events,
                &probe,
                &self.config.locate,
            )
            .await?;
        if observation.is_observed() {
            return Ok(());
        }

        let fallback = provider.locate_instrument_fallback(&instrument);
        if fallback.is_empty() {
            return Err(FailureReason::InstrumentNotFound(instrument));
        }
        reporter.progress(
            Step::LocatingInstrument,
            format!("{} not found by search, browsing instead", instrument),
        );

        handle.instruct_all(fallback).await?;
        let observation = self
            .verify(
                session,
                Step::LocatingInstrument,
                handle,
                events,
                &probe,
                &self.config.locate,
            )
            .await?;
        if !observation.is_observed() {
            return Err(FailureReason::InstrumentNotFound(instrument));
        }
        Ok(())
    }

    async fn execute_trades(
        &self,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        reporter: &SessionReporter,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> SessionOutcome {
        session.enter(Step::ExecutingTrades);
        let total = session.config.order_count;

        for index in 1..=total {
            session.add_attempts(Step::ExecutingTrades, 1);
            reporter.progress(
                Step::ExecutingTrades,
                format!("Placing trade {}/{}", index, total),
            );

            let result = self
                .place_trade(index, session, handle, provider, events)
                .await;
            match &result.error {
                None => reporter.progress(
                    Step::ExecutingTrades,
                    format!("Trade {}/{} submitted", index, total),
                ),
                Some(error) => {
                    warn!(
                        "Session {} trade {}/{} failed: {}",
                        session.id, index, total, error
                    );
                    reporter.progress(
                        Step::ExecutingTrades,
                        format!("Trade {}/{} failed: {}", index, total, error),
                    );
                }
            }
            session.trades.push(result);

            if index < total {
                time::sleep(self.config.trade_settle_delay).await;
            }
        }

        SessionOutcome::from_trades(&session.trades)
    }

    async fn place_trade(
        &self,
        index: u32,
        session: &mut ExecutionSession,
        handle: &HostHandle,
        provider: &dyn ActionProvider,
        events: &mut broadcast::Receiver<HostEvent>,
    ) -> TradeResult {
        if let Err(e) = handle.instruct_all(provider.open_order_entry()).await {
            return TradeResult::failed(index, false, e.to_string());
        }
        match await_observable(
            handle,
            events,
            &provider.order_entry_probe(),
            &self.config.order_entry,
        )
        .await
        {
            Ok(observation) if observation.is_observed() => {}
            Ok(_) => return TradeResult::failed(index, false, "order entry did not open"),
            Err(e) => return TradeResult::failed(index, false, e.to_string()),
        }

        for field in order_fields(session) {
            if let Err(e) = handle.instruct_all(provider.set_field(&field)).await {
                return TradeResult::failed(index, false, format!("setting {}: {}", field, e));
            }
            time::sleep(self.config.field_settle_delay).await;
        }

        // Counted before sending: a partly delivered submit may already be live remotely.
        session.trades_submitted += 1;
        if let Err(e) = handle.instruct_all(provider.submit(session.direction)).await {
            return TradeResult::failed(index, true, e.to_string());
        }

        time::sleep(self.config.confirm_delay).await;
        if let Err(e) = handle.instruct_all(provider.confirm()).await {
            info!("Confirmation for trade {} skipped: {}", index, e);
        }
        TradeResult::succeeded(index)
    }

    async fn verify(
        &self,
        session: &mut ExecutionSession,
        step: Step,
        handle: &HostHandle,
        events: &mut broadcast::Receiver<HostEvent>,
        probe: &ActionDescriptor,
        policy: &StepPolicy,
    ) -> Result<Observation, FailureReason> {
        let observation = await_observable(handle, events, probe, policy).await?;
        session.add_attempts(step, observation.attempts());
        Ok(observation)
    }
}

fn order_fields(session: &ExecutionSession) -> Vec<OrderField> {
    let mut fields = vec![OrderField::Size(session.config.lot_size)];
    if let Some(sl) = session.signal.stop_loss {
        fields.push(OrderField::StopLoss(sl));
    }
    if let Some(tp) = session.signal.take_profit {
        fields.push(OrderField::TakeProfit(tp));
    }
    if let Some(tag) = &session.config.tag {
        fields.push(OrderField::Tag(tag.clone()));
    }
    fields
}

/// Resolves once `cancel` turns true; never if its sender goes away first.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        // Sender gone without cancelling: nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}
