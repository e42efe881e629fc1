//! The market coordinator: single entry point for orders, cancels,
//! lifecycle commands, and AMM operations.
//!
//! One **writer task per market** owns that market's engine state. All
//! commands for a market are serialised through a bounded mpsc channel,
//! which removes intra-market races without a global lock and gives
//! deterministic per-market ordering. Backpressure on a full channel
//! surfaces as `MarketBusy` after a configurable deadline.
//!
//! The writer appends every accepted mutating command to the journal
//! before applying it; events carry the writer's monotonic sequence
//! numbers and are published in production order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use openpredict_amm::{LiquidityChange, Quote};
use openpredict_types::{
    EngineConfig, EngineKind, EventPayload, Market, MarketEvent, MarketId, MarketSpec, MarketState,
    OpenpredictError, Order, OrderId, OrderKind, OrderSide, OrderStatus, Price, Resolution, Result,
    Ticks, Trade, UserId,
};

use crate::engine::{AmmEngine, BookEngine, EngineState, MarketEngine};
use crate::events::EventBus;
use crate::journal::{
    Checkpoint, JournalCommand, JournalEntry, JournalStore, MarketCheckpoint, MemoryJournal,
};
use crate::ledger::Ledger;
use crate::risk::{self, OrderIntent, RiskInputs};

/// An order submission as received from the API layer. The `accredited`
/// flag is vouched for by the (external) identity layer.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: OrderSide,
    pub outcome: usize,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub size: u64,
    pub accredited: bool,
    /// Overall deadline for this request, if the caller carries one.
    pub deadline: Option<std::time::Duration>,
}

/// What a submit produced.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled: u64,
    pub trades: Vec<Trade>,
}

/// What a cancel produced.
#[derive(Debug, Clone, Copy)]
pub struct CancelReceipt {
    pub released: Ticks,
    pub noop: bool,
}

enum Command {
    Submit {
        request: OrderRequest,
        reply: oneshot::Sender<Result<SubmitReceipt>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<Result<CancelReceipt>>,
    },
    Transition {
        to: MarketState,
        resolution: Option<Resolution>,
        reply: oneshot::Sender<Result<Market>>,
    },
    QuoteAmm {
        outcome: usize,
        size: u64,
        side: OrderSide,
        reply: oneshot::Sender<Result<Quote>>,
    },
    SeedPool {
        provider: UserId,
        r_yes: u64,
        r_no: u64,
        reply: oneshot::Sender<Result<LiquidityChange>>,
    },
    AddLiquidity {
        provider: UserId,
        amount: u64,
        reply: oneshot::Sender<Result<LiquidityChange>>,
    },
    RemoveLiquidity {
        provider: UserId,
        shares: u64,
        reply: oneshot::Sender<Result<LiquidityChange>>,
    },
    Describe {
        reply: oneshot::Sender<Market>,
    },
    Snapshot {
        reply: oneshot::Sender<MarketCheckpoint>,
    },
}

struct MarketHandle {
    tx: mpsc::Sender<Command>,
}

/// The coordinator. Cheap to share via `Arc`.
pub struct Coordinator {
    config: EngineConfig,
    ledger: Arc<Ledger>,
    journal: Arc<dyn JournalStore>,
    events: EventBus,
    markets: RwLock<HashMap<MarketId, MarketHandle>>,
}

impl Coordinator {
    /// Build a coordinator with an in-memory journal.
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_journal(config, Arc::new(MemoryJournal::new()))
    }

    /// Build a coordinator over an explicit journal store.
    #[must_use]
    pub fn with_journal(config: EngineConfig, journal: Arc<dyn JournalStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger: Arc::new(Ledger::new()),
            journal,
            events: EventBus::default(),
            markets: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    // =================================================================
    // Market lifecycle
    // =================================================================

    /// Create a market from a spec and spawn its writer. The market
    /// starts in `Draft`; transition it to `Active` to open trading.
    ///
    /// # Errors
    /// Spec validation failures.
    pub fn create_market(&self, spec: MarketSpec) -> Result<MarketId> {
        let market = Market::from_spec(spec, self.config.default_engine)?;
        let market_id = market.id;

        self.journal.append(
            market_id,
            &JournalEntry {
                seq: 1,
                at: Utc::now(),
                command: JournalCommand::CreateMarket {
                    market: market.clone(),
                },
            },
        )?;

        let writer = MarketWriter::new(
            market,
            self.ledger.clone(),
            self.journal.clone(),
            self.events.clone(),
            &self.config,
        );
        self.spawn_writer(market_id, writer);
        info!(%market_id, "market created");
        Ok(market_id)
    }

    fn spawn_writer(&self, market_id: MarketId, mut writer: MarketWriter) {
        let (tx, mut rx) = mpsc::channel(self.config.coordinator.command_queue_depth);
        self.markets.write().insert(market_id, MarketHandle { tx });
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                writer.handle(cmd);
            }
        });
    }

    fn handle_for(&self, market_id: MarketId) -> Result<mpsc::Sender<Command>> {
        self.markets
            .read()
            .get(&market_id)
            .map(|h| h.tx.clone())
            .ok_or(OpenpredictError::UnknownMarket(market_id))
    }

    /// Send a command to a market writer with backpressure: a channel
    /// that stays full past the submit deadline surfaces `MarketBusy`.
    async fn dispatch<T>(
        &self,
        market_id: MarketId,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let tx = self.handle_for(market_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send_timeout(build(reply_tx), self.config.coordinator.submit_deadline())
            .await
            .map_err(|_| OpenpredictError::MarketBusy(market_id))?;
        reply_rx
            .await
            .map_err(|_| OpenpredictError::Internal("market writer terminated".to_string()))?
    }

    // =================================================================
    // Command API
    // =================================================================

    /// Submit an order, honouring the request's deadline if present.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<SubmitReceipt> {
        let market_id = request.market_id;
        let deadline = request.deadline;
        let fut = self.dispatch(market_id, |reply| Command::Submit { request, reply });
        match deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| OpenpredictError::DeadlineExceeded)?,
            None => fut.await,
        }
    }

    /// Cancel an order. Idempotent; terminal orders report `noop`.
    pub async fn cancel_order(
        &self,
        market_id: MarketId,
        order_id: OrderId,
    ) -> Result<CancelReceipt> {
        self.dispatch(market_id, |reply| Command::Cancel { order_id, reply })
            .await
    }

    /// Drive the market lifecycle FSM.
    pub async fn transition_market(
        &self,
        market_id: MarketId,
        to: MarketState,
        resolution: Option<Resolution>,
    ) -> Result<Market> {
        self.dispatch(market_id, |reply| Command::Transition {
            to,
            resolution,
            reply,
        })
        .await
    }

    /// Price an AMM swap without executing it.
    pub async fn quote_amm(
        &self,
        market_id: MarketId,
        outcome: usize,
        size: u64,
        side: OrderSide,
    ) -> Result<Quote> {
        self.dispatch(market_id, |reply| Command::QuoteAmm {
            outcome,
            size,
            side,
            reply,
        })
        .await
    }

    /// Seed an AMM market's pool.
    pub async fn seed_pool(
        &self,
        market_id: MarketId,
        provider: UserId,
        r_yes: u64,
        r_no: u64,
    ) -> Result<LiquidityChange> {
        self.dispatch(market_id, |reply| Command::SeedPool {
            provider,
            r_yes,
            r_no,
            reply,
        })
        .await
    }

    /// Join an AMM market's pool pro-rata.
    pub async fn add_liquidity(
        &self,
        market_id: MarketId,
        provider: UserId,
        amount: u64,
    ) -> Result<LiquidityChange> {
        self.dispatch(market_id, |reply| Command::AddLiquidity {
            provider,
            amount,
            reply,
        })
        .await
    }

    /// Burn pool shares for a pro-rata share of the reserves.
    pub async fn remove_liquidity(
        &self,
        market_id: MarketId,
        provider: UserId,
        shares: u64,
    ) -> Result<LiquidityChange> {
        self.dispatch(market_id, |reply| Command::RemoveLiquidity {
            provider,
            shares,
            reply,
        })
        .await
    }

    /// Current metadata for a market.
    pub async fn market(&self, market_id: MarketId) -> Result<Market> {
        let tx = self.handle_for(market_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Describe { reply: reply_tx })
            .await
            .map_err(|_| OpenpredictError::MarketBusy(market_id))?;
        reply_rx
            .await
            .map_err(|_| OpenpredictError::Internal("market writer terminated".to_string()))
    }

    // =================================================================
    // Checkpoint & recovery
    // =================================================================

    /// Take a checkpoint of the ledger and every market, persist it, and
    /// truncate the covered journal prefixes. Call at a quiescent point
    /// (no in-flight submits); operators typically schedule this as a
    /// background task.
    pub async fn checkpoint(&self) -> Result<Checkpoint> {
        let market_ids: Vec<MarketId> = self.markets.read().keys().copied().collect();
        let mut markets = Vec::with_capacity(market_ids.len());
        for market_id in market_ids {
            let tx = self.handle_for(market_id)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(Command::Snapshot { reply: reply_tx })
                .await
                .map_err(|_| OpenpredictError::MarketBusy(market_id))?;
            let snapshot = reply_rx
                .await
                .map_err(|_| OpenpredictError::Internal("market writer terminated".to_string()))?;
            markets.push(snapshot);
        }
        let checkpoint = Checkpoint {
            ledger: self.ledger.to_snapshot(),
            markets,
            taken_at: Some(Utc::now()),
        };
        self.journal.save_checkpoint(&checkpoint)?;
        for market in &checkpoint.markets {
            self.journal.truncate(market.market.id, market.command_seq)?;
        }
        info!(markets = checkpoint.markets.len(), "checkpoint saved");
        Ok(checkpoint)
    }

    /// Rebuild a coordinator from a journal store: load the latest
    /// checkpoint and replay each market's journal tail in sequence
    /// order. Deterministic IDs make the rebuilt books and trade log
    /// identical to the pre-crash state.
    pub fn recover(config: EngineConfig, journal: Arc<dyn JournalStore>) -> Result<Arc<Self>> {
        let checkpoint = journal.load_checkpoint()?.unwrap_or_default();
        let ledger = Arc::new(Ledger::from_snapshot(&checkpoint.ledger));
        let events = EventBus::default();

        let coordinator = Arc::new(Self {
            config: config.clone(),
            ledger: ledger.clone(),
            journal: journal.clone(),
            events: events.clone(),
            markets: RwLock::new(HashMap::new()),
        });

        // Markets present in the checkpoint resume from their snapshot.
        let mut writers: HashMap<MarketId, MarketWriter> = HashMap::new();
        for snapshot in checkpoint.markets {
            let market_id = snapshot.market.id;
            let writer = MarketWriter::restore(
                snapshot,
                ledger.clone(),
                journal.clone(),
                events.clone(),
                &config,
            )?;
            writers.insert(market_id, writer);
        }

        // Replay journal tails; markets born after the checkpoint start
        // from their CreateMarket entry.
        for market_id in journal.markets()? {
            let entries = journal.entries(market_id)?;
            let mut writer = writers.remove(&market_id);
            let skip_through = writer.as_ref().map_or(0, |w| w.command_seq);
            for entry in entries {
                if entry.seq <= skip_through {
                    continue;
                }
                match entry.command {
                    JournalCommand::CreateMarket { market } if writer.is_none() => {
                        writer = Some(MarketWriter::new(
                            market,
                            ledger.clone(),
                            journal.clone(),
                            events.clone(),
                            &config,
                        ));
                    }
                    command => match writer.as_mut() {
                        Some(w) => w.replay(entry.seq, command),
                        None => {
                            warn!(%market_id, seq = entry.seq, "journal tail precedes market creation");
                        }
                    },
                }
            }
            if let Some(writer) = writer {
                writers.insert(market_id, writer);
            }
        }

        for (market_id, writer) in writers {
            coordinator.spawn_writer(market_id, writer);
        }
        info!("recovery complete");
        Ok(coordinator)
    }
}

// ===================================================================
// The per-market writer
// ===================================================================

struct MarketWriter {
    market: Market,
    engine: MarketEngine,
    ledger: Arc<Ledger>,
    journal: Arc<dyn JournalStore>,
    events: EventBus,
    self_trade: openpredict_types::SelfTradePolicy,
    market_order_policy: openpredict_types::MarketOrderPolicy,
    /// Monotonic sequence of accepted commands (also order time priority).
    command_seq: u64,
    /// Monotonic sequence of published events.
    event_seq: u64,
}

impl MarketWriter {
    fn new(
        market: Market,
        ledger: Arc<Ledger>,
        journal: Arc<dyn JournalStore>,
        events: EventBus,
        config: &EngineConfig,
    ) -> Self {
        let engine = match market.engine {
            EngineKind::OrderBook => {
                MarketEngine::Book(BookEngine::new(market.id, market.outcome_count()))
            }
            EngineKind::Amm => MarketEngine::Amm(AmmEngine::new(market.id, config.amm.fee_bps)),
        };
        Self {
            market,
            engine,
            ledger,
            journal,
            events,
            self_trade: config.risk.self_trade,
            market_order_policy: config.book.market_order_policy,
            command_seq: 1, // CreateMarket took seq 1
            event_seq: 0,
        }
    }

    fn restore(
        snapshot: MarketCheckpoint,
        ledger: Arc<Ledger>,
        journal: Arc<dyn JournalStore>,
        events: EventBus,
        config: &EngineConfig,
    ) -> Result<Self> {
        let engine = match snapshot.engine {
            EngineState::Book { open_orders } => MarketEngine::Book(BookEngine::restore(
                snapshot.market.id,
                snapshot.market.outcome_count(),
                open_orders,
            )?),
            EngineState::Amm { pool } => {
                MarketEngine::Amm(AmmEngine::restore(snapshot.market.id, pool))
            }
        };
        Ok(Self {
            market: snapshot.market,
            engine,
            ledger,
            journal,
            events,
            self_trade: config.risk.self_trade,
            market_order_policy: config.book.market_order_policy,
            command_seq: snapshot.command_seq,
            event_seq: snapshot.event_seq,
        })
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { request, reply } => {
                let result = self.accept_submit(&request);
                let _ = reply.send(result);
            }
            Command::Cancel { order_id, reply } => {
                let result = self.accept(JournalCommand::Cancel { order_id });
                let _ = reply.send(result.and_then(|seq| self.apply_cancel(seq, order_id)));
            }
            Command::Transition {
                to,
                resolution,
                reply,
            } => {
                let result = self.accept(JournalCommand::Transition { to, resolution });
                let _ = reply.send(result.and_then(|seq| self.apply_transition(seq, to, resolution)));
            }
            Command::QuoteAmm {
                outcome,
                size,
                side,
                reply,
            } => {
                let _ = reply.send(self.quote_amm(outcome, size, side));
            }
            Command::SeedPool {
                provider,
                r_yes,
                r_no,
                reply,
            } => {
                let result = self.accept(JournalCommand::SeedPool {
                    provider,
                    r_yes,
                    r_no,
                });
                let _ =
                    reply.send(result.and_then(|_| self.apply_seed_pool(provider, r_yes, r_no)));
            }
            Command::AddLiquidity {
                provider,
                amount,
                reply,
            } => {
                let result = self.accept(JournalCommand::AddLiquidity { provider, amount });
                let _ = reply.send(result.and_then(|_| self.apply_add_liquidity(provider, amount)));
            }
            Command::RemoveLiquidity {
                provider,
                shares,
                reply,
            } => {
                let result = self.accept(JournalCommand::RemoveLiquidity { provider, shares });
                let _ =
                    reply.send(result.and_then(|_| self.apply_remove_liquidity(provider, shares)));
            }
            Command::Describe { reply } => {
                let _ = reply.send(self.market.clone());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(MarketCheckpoint {
                    market: self.market.clone(),
                    engine: self.engine.state(),
                    command_seq: self.command_seq,
                    event_seq: self.event_seq,
                });
            }
        }
    }

    /// Journal an accepted command under the next sequence number.
    fn accept(&mut self, command: JournalCommand) -> Result<u64> {
        self.command_seq += 1;
        let entry = JournalEntry {
            seq: self.command_seq,
            at: Utc::now(),
            command,
        };
        self.journal.append(self.market.id, &entry)?;
        Ok(self.command_seq)
    }

    /// Re-apply a journaled command during recovery (no re-journaling).
    fn replay(&mut self, seq: u64, command: JournalCommand) {
        self.command_seq = seq;
        let result = match command {
            JournalCommand::CreateMarket { .. } => Ok(()),
            JournalCommand::Submit { order } => self.apply_submit(seq, order).map(|_| ()),
            JournalCommand::Cancel { order_id } => self.apply_cancel(seq, order_id).map(|_| ()),
            JournalCommand::Transition { to, resolution } => {
                self.apply_transition(seq, to, resolution).map(|_| ())
            }
            JournalCommand::SeedPool {
                provider,
                r_yes,
                r_no,
            } => self.apply_seed_pool(provider, r_yes, r_no).map(|_| ()),
            JournalCommand::AddLiquidity { provider, amount } => {
                self.apply_add_liquidity(provider, amount).map(|_| ())
            }
            JournalCommand::RemoveLiquidity { provider, shares } => {
                self.apply_remove_liquidity(provider, shares).map(|_| ())
            }
        };
        if let Err(err) = result {
            // A command that failed live fails identically on replay;
            // this is the expected path for journaled rejections.
            tracing::debug!(market = %self.market.id, seq, %err, "replay rejection");
        }
    }

    fn accept_submit(&mut self, request: &OrderRequest) -> Result<SubmitReceipt> {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            market_id: self.market.id,
            user_id: request.user_id,
            side: request.side,
            outcome: request.outcome,
            kind: request.kind,
            price: request.price,
            size: request.size,
            filled: 0,
            status: OrderStatus::Open,
            sequence: self.command_seq + 1,
            submitted_at: now,
            updated_at: now,
        };
        let seq = self.accept(JournalCommand::Submit {
            order: order.clone(),
        })?;
        let accredited = request.accredited;
        self.apply_submit_with_access(seq, order, accredited)
    }

    fn apply_submit(&mut self, seq: u64, order: Order) -> Result<SubmitReceipt> {
        // Journal replay has no access flag; admission decisions that
        // depended on it were already reflected in the journal outcome.
        self.apply_submit_with_access(seq, order, true)
    }

    fn apply_submit_with_access(
        &mut self,
        seq: u64,
        order: Order,
        accredited: bool,
    ) -> Result<SubmitReceipt> {
        let admitted = self.admit(&order, accredited);
        match admitted {
            Ok(()) => {}
            Err(err) => {
                let reason = err.to_string();
                self.publish(EventPayload::OrderRejected {
                    order_id: order.id,
                    user_id: order.user_id,
                    reason,
                });
                return Err(err);
            }
        }

        match self.engine.submit(
            &self.ledger,
            order.clone(),
            seq,
            self.self_trade,
            self.market_order_policy,
        ) {
            Ok(report) => {
                self.publish(EventPayload::OrderAccepted {
                    order_id: report.order.id,
                    user_id: report.order.user_id,
                });
                for trade in &report.trades {
                    self.publish(EventPayload::Trade(trade.clone()));
                }
                if let Some(reason) = &report.cancel_reason {
                    self.publish(EventPayload::OrderCancelled {
                        order_id: report.order.id,
                        user_id: report.order.user_id,
                        released: 0,
                        noop: false,
                    });
                    tracing::debug!(order = %report.order.id, reason, "market order residual cancelled");
                }
                Ok(SubmitReceipt {
                    order_id: report.order.id,
                    status: report.order.status,
                    filled: report.order.filled,
                    trades: report.trades,
                })
            }
            Err(err) => {
                self.publish(EventPayload::OrderRejected {
                    order_id: order.id,
                    user_id: order.user_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Risk-gate an order with caller-supplied inputs.
    fn admit(&self, order: &Order, accredited: bool) -> Result<()> {
        let required_collateral =
            self.engine
                .required_collateral(&self.ledger, order, self.self_trade)?;
        let inputs = RiskInputs {
            market: &self.market,
            balance: self.ledger.balance(order.user_id),
            current_position: self
                .ledger
                .position_shares(order.user_id, self.market.id, order.outcome),
            accredited,
        };
        let intent = OrderIntent {
            side: order.side,
            outcome: order.outcome,
            kind: order.kind,
            price: order.price,
            size: order.size,
            required_collateral,
        };
        risk::check_order(&inputs, &intent)
    }

    fn apply_cancel(&mut self, _seq: u64, order_id: OrderId) -> Result<CancelReceipt> {
        let report = self.engine.cancel(&self.ledger, order_id)?;
        self.publish(EventPayload::OrderCancelled {
            order_id,
            user_id: report.user_id,
            released: report.released,
            noop: report.noop,
        });
        Ok(CancelReceipt {
            released: report.released,
            noop: report.noop,
        })
    }

    fn apply_transition(
        &mut self,
        _seq: u64,
        to: MarketState,
        resolution: Option<Resolution>,
    ) -> Result<Market> {
        let from = self.market.state;
        self.market.transition(to, resolution)?;
        self.publish(EventPayload::MarketStateChanged { from, to });

        if self.market.state.is_terminal() {
            // Leaving trading: every resting order comes off the book
            // with its collateral released.
            for report in self.engine.cancel_all(&self.ledger)? {
                self.publish(EventPayload::OrderCancelled {
                    order_id: report.order_id,
                    user_id: report.user_id,
                    released: report.released,
                    noop: false,
                });
            }
        }
        if to == MarketState::Resolved {
            let resolution = self
                .market
                .resolution
                .ok_or_else(|| OpenpredictError::InvalidResolution {
                    reason: "resolved market missing resolution".to_string(),
                })?;
            self.publish(EventPayload::MarketResolved { resolution });
        }
        info!(market = %self.market.id, %from, %to, "market transition");
        Ok(self.market.clone())
    }

    fn quote_amm(&self, outcome: usize, size: u64, side: OrderSide) -> Result<Quote> {
        match &self.engine {
            MarketEngine::Amm(engine) => engine.quote(outcome, size, side),
            MarketEngine::Book(_) => Err(OpenpredictError::AmmUnsupported {
                reason: "market uses the order book engine".to_string(),
            }),
        }
    }

    fn amm_engine(&mut self) -> Result<&mut AmmEngine> {
        match &mut self.engine {
            MarketEngine::Amm(engine) => Ok(engine),
            MarketEngine::Book(_) => Err(OpenpredictError::AmmUnsupported {
                reason: "market uses the order book engine".to_string(),
            }),
        }
    }

    fn apply_seed_pool(
        &mut self,
        provider: UserId,
        r_yes: u64,
        r_no: u64,
    ) -> Result<LiquidityChange> {
        let ledger = self.ledger.clone();
        self.amm_engine()?.seed(&ledger, provider, r_yes, r_no)
    }

    fn apply_add_liquidity(&mut self, provider: UserId, amount: u64) -> Result<LiquidityChange> {
        if !self.market.state.is_tradable() {
            return Err(OpenpredictError::MarketNotTradable {
                state: self.market.state,
            });
        }
        let ledger = self.ledger.clone();
        self.amm_engine()?.add_liquidity(&ledger, provider, amount)
    }

    fn apply_remove_liquidity(&mut self, provider: UserId, shares: u64) -> Result<LiquidityChange> {
        let ledger = self.ledger.clone();
        self.amm_engine()?.remove_liquidity(&ledger, provider, shares)
    }

    fn publish(&mut self, payload: EventPayload) {
        self.event_seq += 1;
        self.events.publish(MarketEvent {
            market_id: self.market.id,
            sequence: self.event_seq,
            at: Utc::now(),
            payload,
        });
    }
}
