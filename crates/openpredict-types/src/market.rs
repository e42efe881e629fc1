//! Market model and lifecycle state machine.
//!
//! A market is created from a [`MarketSpec`] by an authorised operator and
//! then only mutates through the lifecycle transitions enforced by
//! [`MarketState::can_transition`]. Resolved and cancelled markets are
//! retained for audit — never destroyed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_OUTCOMES, PRICE_SCALE};
use crate::{MarketId, OpenpredictError, Result, Ticks, UserId};

/// What kind of question the market resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    /// Two outcomes, exactly one wins.
    Binary,
    /// Up to [`MAX_OUTCOMES`] labelled outcomes, exactly one wins.
    Categorical,
    /// Resolves to a numeric value interpolated between bounds.
    Scalar,
}

impl std::fmt::Display for MarketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "BINARY"),
            Self::Categorical => write!(f, "CATEGORICAL"),
            Self::Scalar => write!(f, "SCALAR"),
        }
    }
}

/// Which engine prices and fills orders for the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    OrderBook,
    Amm,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderBook => write!(f, "ORDER_BOOK"),
            Self::Amm => write!(f, "AMM"),
        }
    }
}

/// Lifecycle state of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    Draft,
    Active,
    Paused,
    Resolved,
    Cancelled,
}

impl MarketState {
    /// Whether new orders are accepted in this state.
    #[must_use]
    pub fn is_tradable(self) -> bool {
        self == Self::Active
    }

    /// Whether the market has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }

    /// The lifecycle FSM:
    /// draft → active, active ↔ paused,
    /// active|paused → resolved, any non-resolved → cancelled.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use MarketState::{Active, Cancelled, Draft, Paused, Resolved};
        match (self, to) {
            (Draft, Active) => true,
            (Active, Paused) | (Paused, Active) => true,
            (Active | Paused, Resolved) => true,
            (Draft | Active | Paused, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "DRAFT"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Bounds for a scalar market's payoff interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarBounds {
    pub lower: i64,
    pub upper: i64,
}

/// How a market resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Winning outcome index (binary / categorical).
    Outcome(usize),
    /// Resolved numeric value (scalar).
    Value(i64),
}

/// Operator-supplied description of a new market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSpec {
    pub title: String,
    pub kind: MarketKind,
    /// `None` falls back to the configured default engine.
    pub engine: Option<EngineKind>,
    /// Outcome labels, index-addressed by orders and positions.
    pub outcomes: Vec<String>,
    /// Per-user share cap per outcome.
    pub position_cap: u64,
    /// Restrict trading to accredited users.
    pub accredited_only: bool,
    /// Trading close time; `None` leaves closing to the operator.
    pub close_time: Option<DateTime<Utc>>,
    /// The account allowed to resolve the market.
    pub resolver: UserId,
    /// Required for scalar markets, forbidden otherwise.
    pub scalar_bounds: Option<ScalarBounds>,
}

impl MarketSpec {
    /// The engine this spec will run on, given the configured default.
    #[must_use]
    pub fn resolved_engine(&self, default_engine: EngineKind) -> EngineKind {
        self.engine.unwrap_or(default_engine)
    }

    /// Validate the spec before a market is created from it.
    /// `engine` is the already-resolved engine choice.
    ///
    /// # Errors
    /// Returns `InvalidMarketSpec` describing the first problem found.
    pub fn validate(&self, engine: EngineKind) -> Result<()> {
        let fail = |reason: &str| {
            Err(OpenpredictError::InvalidMarketSpec {
                reason: reason.to_string(),
            })
        };
        match self.kind {
            MarketKind::Binary if self.outcomes.len() != 2 => {
                return fail("binary markets must have exactly 2 outcomes");
            }
            MarketKind::Categorical
                if self.outcomes.len() < 2 || self.outcomes.len() > MAX_OUTCOMES =>
            {
                return fail("categorical markets must have 2..=16 outcomes");
            }
            MarketKind::Scalar => {
                if self.outcomes.len() != 2 {
                    return fail("scalar markets must have exactly 2 outcomes (over/under)");
                }
                match self.scalar_bounds {
                    None => return fail("scalar markets require bounds"),
                    Some(b) if b.lower >= b.upper => {
                        return fail("scalar bounds must satisfy lower < upper");
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }
        if self.kind != MarketKind::Scalar && self.scalar_bounds.is_some() {
            return fail("bounds are only valid on scalar markets");
        }
        if engine == EngineKind::Amm && self.kind != MarketKind::Binary {
            return Err(OpenpredictError::AmmUnsupported {
                reason: format!("{} markets must use the order book", self.kind),
            });
        }
        if self.position_cap == 0 {
            return fail("position cap must be positive");
        }
        Ok(())
    }
}

/// A live market record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub title: String,
    pub kind: MarketKind,
    pub engine: EngineKind,
    pub state: MarketState,
    pub outcomes: Vec<String>,
    pub position_cap: u64,
    pub accredited_only: bool,
    pub close_time: Option<DateTime<Utc>>,
    pub resolver: UserId,
    pub scalar_bounds: Option<ScalarBounds>,
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// Create a market in `Draft` from a spec, resolving an unspecified
    /// engine against the configured default.
    ///
    /// # Errors
    /// Propagates [`MarketSpec::validate`] failures.
    pub fn from_spec(spec: MarketSpec, default_engine: EngineKind) -> Result<Self> {
        let engine = spec.resolved_engine(default_engine);
        spec.validate(engine)?;
        let now = Utc::now();
        Ok(Self {
            id: MarketId::new(),
            title: spec.title,
            kind: spec.kind,
            engine,
            state: MarketState::Draft,
            outcomes: spec.outcomes,
            position_cap: spec.position_cap,
            accredited_only: spec.accredited_only,
            close_time: spec.close_time,
            resolver: spec.resolver,
            scalar_bounds: spec.scalar_bounds,
            resolution: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Number of outcomes.
    #[must_use]
    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Validate an outcome index against this market.
    ///
    /// # Errors
    /// Returns `InvalidOutcome` when out of range.
    pub fn check_outcome(&self, index: usize) -> Result<()> {
        if index >= self.outcomes.len() {
            return Err(OpenpredictError::InvalidOutcome {
                index,
                count: self.outcomes.len(),
            });
        }
        Ok(())
    }

    /// Apply a lifecycle transition.
    ///
    /// # Errors
    /// Returns `InvalidTransition` when the FSM forbids it, or
    /// `InvalidResolution` when resolving without a valid value.
    pub fn transition(&mut self, to: MarketState, resolution: Option<Resolution>) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(OpenpredictError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        if to == MarketState::Resolved {
            let res = resolution.ok_or_else(|| OpenpredictError::InvalidResolution {
                reason: "resolution value required".to_string(),
            })?;
            self.validate_resolution(res)?;
            self.resolution = Some(res);
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn validate_resolution(&self, res: Resolution) -> Result<()> {
        match (self.kind, res) {
            (MarketKind::Binary | MarketKind::Categorical, Resolution::Outcome(ix)) => {
                self.check_outcome(ix)
            }
            (MarketKind::Scalar, Resolution::Value(_)) => Ok(()),
            _ => Err(OpenpredictError::InvalidResolution {
                reason: format!("resolution {res:?} does not match market kind {}", self.kind),
            }),
        }
    }

    /// Per-share payout vector for a resolution, one entry per outcome,
    /// each in `[0, PRICE_SCALE]`.
    ///
    /// Binary / categorical: the winning outcome pays `PRICE_SCALE`, the
    /// rest pay zero. Scalar: outcome 0 pays the resolved value linearly
    /// interpolated between the bounds (clamped), outcome 1 pays the exact
    /// complement, so the two legs of every minted pair always sum to
    /// `PRICE_SCALE`.
    ///
    /// # Errors
    /// Returns `NotResolved` when the market has no resolution yet.
    pub fn payout_vector(&self) -> Result<Vec<Ticks>> {
        let res = self
            .resolution
            .ok_or(OpenpredictError::NotResolved(self.id))?;
        match res {
            Resolution::Outcome(winner) => Ok((0..self.outcomes.len())
                .map(|i| if i == winner { PRICE_SCALE } else { 0 })
                .collect()),
            Resolution::Value(v) => {
                let bounds = self.scalar_bounds.ok_or_else(|| {
                    OpenpredictError::InvalidResolution {
                        reason: "scalar market missing bounds".to_string(),
                    }
                })?;
                let clamped = v.clamp(bounds.lower, bounds.upper);
                let range = (bounds.upper - bounds.lower) as i128;
                let offset = (clamped - bounds.lower) as i128;
                let long = (offset * PRICE_SCALE as i128 / range) as Ticks;
                Ok(vec![long, PRICE_SCALE - long])
            }
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl MarketSpec {
    pub fn dummy_binary(engine: EngineKind) -> Self {
        Self {
            title: "Will it happen?".to_string(),
            kind: MarketKind::Binary,
            engine: Some(engine),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            position_cap: 1_000_000,
            accredited_only: false,
            close_time: None,
            resolver: UserId::new(),
            scalar_bounds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use MarketState::{Active, Cancelled, Draft, Paused, Resolved};
        assert!(Draft.can_transition(Active));
        assert!(Active.can_transition(Paused));
        assert!(Paused.can_transition(Active));
        assert!(Active.can_transition(Resolved));
        assert!(Paused.can_transition(Resolved));
        assert!(Paused.can_transition(Cancelled));

        assert!(!Draft.can_transition(Resolved));
        assert!(!Resolved.can_transition(Active));
        assert!(!Resolved.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Active));
    }

    #[test]
    fn binary_spec_requires_two_outcomes() {
        let mut spec = MarketSpec::dummy_binary(EngineKind::OrderBook);
        spec.outcomes.push("Maybe".to_string());
        assert!(matches!(
            spec.validate(EngineKind::OrderBook),
            Err(OpenpredictError::InvalidMarketSpec { .. })
        ));
    }

    #[test]
    fn amm_rejected_for_categorical() {
        let spec = MarketSpec {
            kind: MarketKind::Categorical,
            engine: Some(EngineKind::Amm),
            outcomes: vec!["A".into(), "B".into(), "C".into()],
            ..MarketSpec::dummy_binary(EngineKind::Amm)
        };
        assert!(matches!(
            spec.validate(EngineKind::Amm),
            Err(OpenpredictError::AmmUnsupported { .. })
        ));
    }

    #[test]
    fn scalar_spec_requires_bounds() {
        let mut spec = MarketSpec::dummy_binary(EngineKind::OrderBook);
        spec.kind = MarketKind::Scalar;
        spec.outcomes = vec!["Over".into(), "Under".into()];
        assert!(spec.validate(EngineKind::OrderBook).is_err());

        spec.scalar_bounds = Some(ScalarBounds {
            lower: 100,
            upper: 50,
        });
        assert!(spec.validate(EngineKind::OrderBook).is_err());

        spec.scalar_bounds = Some(ScalarBounds {
            lower: 50,
            upper: 100,
        });
        assert!(spec.validate(EngineKind::OrderBook).is_ok());
    }

    #[test]
    fn resolve_requires_value() {
        let mut market = Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook).unwrap();
        market.transition(MarketState::Active, None).unwrap();
        let err = market.transition(MarketState::Resolved, None).unwrap_err();
        assert!(matches!(err, OpenpredictError::InvalidResolution { .. }));

        market
            .transition(MarketState::Resolved, Some(Resolution::Outcome(0)))
            .unwrap();
        assert_eq!(market.state, MarketState::Resolved);
        assert_eq!(market.resolution, Some(Resolution::Outcome(0)));
    }

    #[test]
    fn binary_payout_vector() {
        let mut market = Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook).unwrap();
        market.transition(MarketState::Active, None).unwrap();
        market
            .transition(MarketState::Resolved, Some(Resolution::Outcome(0)))
            .unwrap();
        assert_eq!(market.payout_vector().unwrap(), vec![PRICE_SCALE, 0]);
    }

    #[test]
    fn scalar_payout_interpolates() {
        let mut spec = MarketSpec::dummy_binary(EngineKind::OrderBook);
        spec.kind = MarketKind::Scalar;
        spec.outcomes = vec!["Over".into(), "Under".into()];
        spec.scalar_bounds = Some(ScalarBounds {
            lower: 0,
            upper: 200,
        });
        let mut market = Market::from_spec(spec, EngineKind::OrderBook).unwrap();
        market.transition(MarketState::Active, None).unwrap();
        market
            .transition(MarketState::Resolved, Some(Resolution::Value(50)))
            .unwrap();

        let payouts = market.payout_vector().unwrap();
        assert_eq!(payouts, vec![2_500, 7_500]);
        assert_eq!(payouts[0] + payouts[1], PRICE_SCALE);
    }

    #[test]
    fn scalar_payout_clamps_out_of_range() {
        let mut spec = MarketSpec::dummy_binary(EngineKind::OrderBook);
        spec.kind = MarketKind::Scalar;
        spec.outcomes = vec!["Over".into(), "Under".into()];
        spec.scalar_bounds = Some(ScalarBounds {
            lower: 100,
            upper: 200,
        });
        let mut market = Market::from_spec(spec, EngineKind::OrderBook).unwrap();
        market.transition(MarketState::Active, None).unwrap();
        market
            .transition(MarketState::Resolved, Some(Resolution::Value(9_999)))
            .unwrap();
        assert_eq!(market.payout_vector().unwrap(), vec![PRICE_SCALE, 0]);
    }

    #[test]
    fn payout_before_resolution_fails() {
        let market = Market::from_spec(MarketSpec::dummy_binary(EngineKind::OrderBook), EngineKind::OrderBook).unwrap();
        assert!(matches!(
            market.payout_vector(),
            Err(OpenpredictError::NotResolved(_))
        ));
    }
}
