//! NATS request consumer and request dispatch

use crate::config::NatsConfig;
use crate::error::ValidationError;
use crate::models::engine::AnalyticsEngine;
use crate::types::anomaly::AnomalyClass;
use crate::types::assessment::RiskLevel;
use crate::types::request::{
    decode, AnomalyRequest, AreaRequest, RiskRequest, RouteRiskRequest, ServiceReply,
};
use anyhow::Result;
use async_nats::{Client, Message, Subscriber};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::info;

/// Kind of request, derived from the subject it arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Risk,
    Route,
    Anomaly,
    Area,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [
        RequestKind::Risk,
        RequestKind::Route,
        RequestKind::Anomaly,
        RequestKind::Area,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Risk => "risk",
            RequestKind::Route => "route",
            RequestKind::Anomaly => "anomaly",
            RequestKind::Area => "area",
        }
    }
}

/// Consumer for the request subjects of every [`RequestKind`]
pub struct RequestConsumer {
    client: Client,
    risk_subject: String,
    route_subject: String,
    anomaly_subject: String,
    area_subject: String,
}

impl RequestConsumer {
    pub fn new(client: Client, config: &NatsConfig) -> Self {
        Self {
            client,
            risk_subject: config.risk_subject.clone(),
            route_subject: config.route_subject.clone(),
            anomaly_subject: config.anomaly_subject.clone(),
            area_subject: config.area_subject.clone(),
        }
    }

    /// Subscribe to the subject of one request kind
    pub async fn subscribe(&self, kind: RequestKind) -> Result<Subscriber> {
        let subject = self.subject(kind).to_string();
        let subscriber = self.client.subscribe(subject.clone()).await?;
        info!(subject = %subject, kind = kind.as_str(), "Subscribed to request subject");
        Ok(subscriber)
    }

    /// All subscriptions merged into one stream tagged by kind
    pub async fn subscribe_all(&self) -> Result<impl Stream<Item = (RequestKind, Message)> + Unpin> {
        let mut subscriptions = Vec::with_capacity(RequestKind::ALL.len());
        for kind in RequestKind::ALL {
            let subscriber = self.subscribe(kind).await?;
            subscriptions.push(subscriber.map(move |m| (kind, m)));
        }
        Ok(stream::select_all(subscriptions))
    }

    pub fn subject(&self, kind: RequestKind) -> &str {
        match kind {
            RequestKind::Risk => &self.risk_subject,
            RequestKind::Route => &self.route_subject,
            RequestKind::Anomaly => &self.anomaly_subject,
            RequestKind::Area => &self.area_subject,
        }
    }
}

/// What a handled request produced, for metrics and logging
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Risk {
        score: f64,
        level: RiskLevel,
    },
    Route {
        score: f64,
        level: RiskLevel,
    },
    Anomaly {
        evaluated: usize,
        flags: Vec<AnomalyClass>,
        erratic: bool,
    },
    Area {
        hotspots: usize,
        insights: usize,
    },
    Rejected(ValidationError),
}

/// Serialized reply plus the outcome behind it
#[derive(Debug)]
pub struct HandledRequest {
    pub reply: Vec<u8>,
    pub outcome: Outcome,
}

/// Decode a payload, run it through the engine and build the reply.
///
/// Validation failures become `ok: false` replies; only serialization of the
/// reply itself can fail.
pub fn handle_request(
    engine: &AnalyticsEngine,
    kind: RequestKind,
    payload: &[u8],
) -> Result<HandledRequest> {
    match kind {
        RequestKind::Risk => {
            let result = decode::<RiskRequest>(payload).and_then(|req| engine.assess_risk(&req));
            match result {
                Ok(response) => {
                    let outcome = Outcome::Risk {
                        score: response.score,
                        level: response.risk_level,
                    };
                    respond(ServiceReply::success(response), outcome)
                }
                Err(e) => reject::<()>(e),
            }
        }
        RequestKind::Route => {
            let result =
                decode::<RouteRiskRequest>(payload).and_then(|req| engine.assess_route(&req));
            match result {
                Ok(response) => {
                    let outcome = Outcome::Route {
                        score: response.score,
                        level: response.risk_level,
                    };
                    respond(ServiceReply::success(response), outcome)
                }
                Err(e) => reject::<()>(e),
            }
        }
        RequestKind::Anomaly => {
            let result =
                decode::<AnomalyRequest>(payload).and_then(|req| engine.detect_anomalies(&req));
            match result {
                Ok(response) => {
                    let outcome = Outcome::Anomaly {
                        evaluated: response.summary.evaluated,
                        flags: response.flags.iter().map(|f| f.classification).collect(),
                        erratic: response.summary.erratic_movement,
                    };
                    respond(ServiceReply::success(response), outcome)
                }
                Err(e) => reject::<()>(e),
            }
        }
        RequestKind::Area => {
            let result = decode::<AreaRequest>(payload).and_then(|req| engine.analyze_area(&req));
            match result {
                Ok(response) => {
                    let outcome = Outcome::Area {
                        hotspots: response.hotspots,
                        insights: response.insights.len(),
                    };
                    respond(ServiceReply::success(response), outcome)
                }
                Err(e) => reject::<()>(e),
            }
        }
    }
}

fn respond<T: Serialize>(reply: ServiceReply<T>, outcome: Outcome) -> Result<HandledRequest> {
    Ok(HandledRequest {
        reply: serde_json::to_vec(&reply)?,
        outcome,
    })
}

fn reject<T: Serialize>(error: ValidationError) -> Result<HandledRequest> {
    let reply = ServiceReply::<T>::rejected(&error);
    respond(reply, Outcome::Rejected(error))
}
