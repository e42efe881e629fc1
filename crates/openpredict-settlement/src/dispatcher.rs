//! Settlement dispatch: resolution events → background payout tasks.
//!
//! A listener subscribes to the coordinator's event stream; every
//! `MarketResolved` fans out one high-priority task per holder. The task
//! handler settles a single (market, user) pair, which is idempotent, so
//! the queue's at-least-once delivery is safe.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use openpredict_core::Coordinator;
use openpredict_resilience::{TaskHandler, TaskPriority, TaskQueue};
use openpredict_types::{EventPayload, MarketId, OpenpredictError, Result, UserId};

use crate::settler::Settler;

/// Handler name the dispatcher registers on the task queue.
pub const SETTLEMENT_TASK: &str = "settlement.payout";

/// Payload of one settlement task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementTask {
    pub market_id: MarketId,
    pub user_id: UserId,
}

struct SettleHandler {
    coordinator: Arc<Coordinator>,
    settler: Arc<Settler>,
}

#[async_trait]
impl TaskHandler for SettleHandler {
    async fn run(&self, payload: &serde_json::Value) -> Result<()> {
        let task: SettlementTask = serde_json::from_value(payload.clone())
            .map_err(|e| OpenpredictError::Serialization(e.to_string()))?;
        let market = self.coordinator.market(task.market_id).await?;
        self.settler.settle_user(&market, task.user_id)?;
        Ok(())
    }
}

/// Wires resolution events to the task queue.
pub struct SettlementDispatcher;

impl SettlementDispatcher {
    /// Register the settlement handler and start the event listener.
    /// The returned handle runs until the event stream closes.
    pub fn start(
        coordinator: Arc<Coordinator>,
        queue: Arc<TaskQueue>,
        settler: Arc<Settler>,
    ) -> JoinHandle<()> {
        queue.register_handler(
            SETTLEMENT_TASK,
            Arc::new(SettleHandler {
                coordinator: coordinator.clone(),
                settler,
            }),
        );

        let mut events = coordinator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !matches!(event.payload, EventPayload::MarketResolved { .. }) {
                            continue;
                        }
                        let holders = coordinator.ledger().holders(event.market_id);
                        info!(
                            market = %event.market_id,
                            holders = holders.len(),
                            "dispatching settlement tasks"
                        );
                        for user_id in holders {
                            let payload = serde_json::to_value(SettlementTask {
                                market_id: event.market_id,
                                user_id,
                            })
                            .expect("settlement task serialises");
                            if let Err(err) =
                                queue.enqueue(SETTLEMENT_TASK, payload, TaskPriority::High)
                            {
                                error!(market = %event.market_id, %user_id, %err, "settlement enqueue failed");
                            }
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // A lagged dispatcher may have missed a resolution;
                        // operators re-run settlement, which is idempotent.
                        warn!(missed, "settlement dispatcher lagged the event stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
