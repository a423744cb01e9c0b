//! Policy gate between the scanners and the executor.
//!
//! Every consumed entry is acknowledged no matter the outcome, parse
//! failures included, so a poison message can never wedge the group.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::{debug, info, warn};

use arbor_bus::{Bus, ShutdownSignal, GROUP_RISK, STREAM_APPROVED, STREAM_TO_RISK};
use arbor_config::RiskConfig;
use arbor_core::edge::{evaluate_payload, fees_bps, EdgeBreakdown};
use arbor_core::{Opportunity, PolicySnapshot, RiskBlock};

const READ_BLOCK: Duration = Duration::from_millis(1000);
const READ_COUNT: usize = 50;
const READ_BACKOFF: Duration = Duration::from_millis(300);

/// Why an opportunity was turned away.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reason {
    PaperModeNotAllowed,
    MissingSide,
    SizeExceedsCap,
    EdgeBelowThreshold,
    NetBelowThreshold,
}

impl Reason {
    /// Label used on the rejection counter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaperModeNotAllowed => "paper_mode_not_allowed",
            Self::MissingSide => "missing_side",
            Self::SizeExceedsCap => "size_exceeds_cap",
            Self::EdgeBelowThreshold => "edge_below_threshold",
            Self::NetBelowThreshold => "net_below_threshold",
        }
    }
}

/// Outcome of one policy evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    Approve(EdgeBreakdown),
    Reject(Reason),
}

/// Counters exposed by the risk engine.
pub struct RiskMetrics {
    registry: Registry,
    approved_total: IntCounter,
    rejected_total: IntCounterVec,
    parse_failures_total: IntCounter,
}

impl RiskMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let approved_total =
            IntCounter::new("approved_total", "Opportunities re-published as approved").unwrap();
        let rejected_total = IntCounterVec::new(
            Opts::new("rejected_total", "Opportunities rejected by policy"),
            &["reason"],
        )
        .unwrap();
        let parse_failures_total =
            IntCounter::new("parse_failures_total", "Entries that failed to parse").unwrap();
        registry.register(Box::new(approved_total.clone())).unwrap();
        registry.register(Box::new(rejected_total.clone())).unwrap();
        registry
            .register(Box::new(parse_failures_total.clone()))
            .unwrap();
        Self {
            registry,
            approved_total,
            rejected_total,
            parse_failures_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    #[must_use]
    pub fn approved(&self) -> u64 {
        self.approved_total.get()
    }

    #[must_use]
    pub fn rejected(&self, reason: &str) -> u64 {
        self.rejected_total.with_label_values(&[reason]).get()
    }

    #[must_use]
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures_total.get()
    }
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The risk-engine service.
pub struct RiskEngine {
    bus: Arc<dyn Bus>,
    config: RiskConfig,
    consumer: String,
    metrics: RiskMetrics,
}

impl RiskEngine {
    pub fn new(bus: Arc<dyn Bus>, config: RiskConfig) -> Self {
        Self {
            bus,
            config,
            consumer: "risk-1".to_string(),
            metrics: RiskMetrics::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &RiskMetrics {
        &self.metrics
    }

    /// Apply the policy table, checks in order; the first failure wins.
    #[must_use]
    pub fn evaluate(&self, opportunity: &Opportunity) -> Verdict {
        let payload = &opportunity.payload;
        if payload.paper && !self.config.allow_paper_only {
            return Verdict::Reject(Reason::PaperModeNotAllowed);
        }
        if self.config.require_both_sides
            && (payload.buy_leg().is_none() || payload.sell_leg().is_none())
        {
            return Verdict::Reject(Reason::MissingSide);
        }
        if let Some(total) = payload.total_size() {
            if total > self.config.max_total_size {
                return Verdict::Reject(Reason::SizeExceedsCap);
            }
        }
        let Some(edge) = evaluate_payload(payload) else {
            // No buy/sell pair to price an edge from.
            return Verdict::Reject(Reason::MissingSide);
        };
        if edge.gross_bps < self.config.edge_min_bps {
            return Verdict::Reject(Reason::EdgeBelowThreshold);
        }
        if edge.net_bps < self.config.net_min_bps {
            return Verdict::Reject(Reason::NetBelowThreshold);
        }
        Verdict::Approve(edge)
    }

    fn approve(&self, opportunity: &Opportunity, edge: EdgeBreakdown) -> Opportunity {
        let mut approved = opportunity.clone();
        approved.approved = Some(true);
        approved.risk = Some(RiskBlock {
            net_bps: edge.net_bps,
            total_fees_like_bps: fees_bps(&opportunity.payload),
            policy: PolicySnapshot {
                edge_min_bps: self.config.edge_min_bps,
                net_min_bps: self.config.net_min_bps,
                max_total_size: self.config.max_total_size,
                allow_paper_only: self.config.allow_paper_only,
            },
        });
        approved
    }

    async fn process_entry(&self, data: &str) {
        let opportunity: Opportunity = match serde_json::from_str(data) {
            Ok(opportunity) => opportunity,
            Err(err) => {
                self.metrics.parse_failures_total.inc();
                warn!(error = %err, "dropping unparseable opportunity");
                return;
            }
        };
        match self.evaluate(&opportunity) {
            Verdict::Approve(edge) => {
                let approved = self.approve(&opportunity, edge);
                match serde_json::to_string(&approved) {
                    Ok(encoded) => {
                        if let Err(err) = self.bus.append(STREAM_APPROVED, &encoded).await {
                            warn!(error = %err, id = %opportunity.id, "approved append failed");
                        } else {
                            self.metrics.approved_total.inc();
                            info!(
                                id = %opportunity.id,
                                net_bps = %edge.net_bps.round_dp(2),
                                "opportunity approved"
                            );
                        }
                    }
                    Err(err) => warn!(error = %err, "approved encode failed"),
                }
            }
            Verdict::Reject(reason) => {
                self.metrics
                    .rejected_total
                    .with_label_values(&[reason.as_str()])
                    .inc();
                debug!(id = %opportunity.id, reason = reason.as_str(), "opportunity rejected");
            }
        }
    }

    /// Main consumer loop over `scanner.to.risk`.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        self.bus.create_group(STREAM_TO_RISK, GROUP_RISK).await?;
        info!("risk engine started");
        loop {
            if shutdown.triggered() {
                break;
            }
            let batch = tokio::select! {
                batch = self.bus.read_group(
                    STREAM_TO_RISK,
                    GROUP_RISK,
                    &self.consumer,
                    READ_COUNT,
                    READ_BLOCK,
                ) => batch,
                _ = shutdown.wait() => break,
            };
            let entries = match batch {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "risk read failed");
                    if !shutdown.sleep(READ_BACKOFF).await {
                        break;
                    }
                    continue;
                }
            };
            for entry in entries {
                self.process_entry(&entry.data).await;
                if let Err(err) = self.bus.ack(STREAM_TO_RISK, GROUP_RISK, &entry.id).await {
                    warn!(error = %err, id = %entry.id, "risk ack failed");
                }
            }
        }
        info!("risk engine stopped");
        Ok(())
    }
}
