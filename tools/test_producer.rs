//! Test Request Producer
//!
//! Generates risk, route, anomaly and area requests and sends them to the
//! engine over NATS for end-to-end testing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Centre of the generated traffic
const CENTER: (f64, f64) = (20.2961, 85.8245);

#[derive(Debug, Clone, Serialize)]
struct RiskRequest {
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_profile: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GeoPoint {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone, Serialize)]
struct RoutePlan {
    start: GeoPoint,
    end: GeoPoint,
    waypoints: Vec<GeoPoint>,
}

#[derive(Debug, Clone, Serialize)]
struct RouteRiskRequest {
    route: RoutePlan,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct AreaQuery {
    center: GeoPoint,
    radius_km: f64,
}

#[derive(Debug, Clone, Serialize)]
struct AreaRequest {
    area: AreaQuery,
}

#[derive(Debug, Clone, Serialize)]
struct LocationPoint {
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct AnomalyRequest {
    subject_id: String,
    locations: Vec<LocationPoint>,
}

/// Request generator for testing
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    subjects: u32,
}

impl RequestGenerator {
    fn new(subjects: u32) -> Self {
        Self {
            rng: rand::thread_rng(),
            subjects: subjects.max(1),
        }
    }

    fn subject_id(&mut self) -> String {
        format!("subject_{:04}", self.rng.gen_range(0..self.subjects))
    }

    /// Point within roughly `spread_deg` of the centre
    fn near_center(&mut self, spread_deg: f64) -> (f64, f64) {
        (
            CENTER.0 + self.rng.gen_range(-spread_deg..spread_deg),
            CENTER.1 + self.rng.gen_range(-spread_deg..spread_deg),
        )
    }

    fn generate_risk(&mut self) -> RiskRequest {
        let (latitude, longitude) = self.near_center(0.05);
        let hours_ago = self.rng.gen_range(0..24);

        RiskRequest {
            latitude,
            longitude,
            timestamp: Utc::now() - ChronoDuration::hours(hours_ago),
            user_profile: self
                .rng
                .gen_bool(0.3)
                .then(|| self.random_choice(&["tourist", "resident", "night_worker"]).to_string()),
        }
    }

    fn point(&mut self, spread_deg: f64) -> GeoPoint {
        let (lat, lng) = self.near_center(spread_deg);
        GeoPoint { lat, lng }
    }

    fn generate_route(&mut self) -> RouteRiskRequest {
        let start = self.point(0.05);
        let end = self.point(0.05);
        let waypoints = (0..self.rng.gen_range(0..4)).map(|_| self.point(0.05)).collect();

        RouteRiskRequest {
            route: RoutePlan {
                start,
                end,
                waypoints,
            },
            timestamp: Utc::now() - ChronoDuration::hours(self.rng.gen_range(0..24)),
        }
    }

    fn generate_area(&mut self) -> AreaRequest {
        AreaRequest {
            area: AreaQuery {
                center: self.point(0.05),
                radius_km: self.rng.gen_range(1.0..10.0),
            },
        }
    }

    /// A walk or drive at an ordinary pace
    fn generate_plausible(&mut self) -> AnomalyRequest {
        let subject_id = self.subject_id();
        let steps = self.rng.gen_range(3..12);
        let speed_kmh = self.rng.gen_range(3.0..50.0);
        let (mut lat, mut lon) = self.near_center(0.02);
        let mut timestamp = Utc::now() - ChronoDuration::minutes(steps as i64 * 2);

        let mut locations = Vec::with_capacity(steps);
        for _ in 0..steps {
            locations.push(LocationPoint {
                lat,
                lon,
                timestamp,
                speed: Some(speed_kmh),
            });
            // Two minutes at `speed_kmh`, roughly north-east
            let step_deg = speed_kmh / 30.0 / 111.0;
            lat += step_deg * self.rng.gen_range(0.3..1.0);
            lon += step_deg * self.rng.gen_range(0.3..1.0);
            timestamp += ChronoDuration::minutes(2);
        }

        AnomalyRequest {
            subject_id,
            locations,
        }
    }

    /// A sequence with one physically implausible jump
    fn generate_implausible(&mut self) -> AnomalyRequest {
        let mut request = self.generate_plausible();
        let jump_deg = self.rng.gen_range(0.5..3.0);
        let at = self.rng.gen_range(1..request.locations.len());

        for point in &mut request.locations[at..] {
            point.lat += jump_deg;
        }
        // Seconds after the previous fix
        let previous = request.locations[at - 1].timestamp;
        let offset = ChronoDuration::seconds(self.rng.gen_range(1..60));
        let shift = previous + offset - request.locations[at].timestamp;
        for point in &mut request.locations[at..] {
            point.timestamp += shift;
        }

        request
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

enum Generated {
    Risk(RiskRequest),
    Route(RouteRiskRequest),
    Anomaly { request: AnomalyRequest, implausible: bool },
    Area(AreaRequest),
}

impl Generated {
    fn subject(&self) -> &'static str {
        match self {
            Generated::Risk(_) => "risk.predict",
            Generated::Route(_) => "risk.route",
            Generated::Anomaly { .. } => "anomaly.detect",
            Generated::Area(_) => "patterns.analyze",
        }
    }

    fn payload(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Generated::Risk(r) => serde_json::to_vec(r),
            Generated::Route(r) => serde_json::to_vec(r),
            Generated::Anomaly { request, .. } => serde_json::to_vec(request),
            Generated::Area(a) => serde_json::to_vec(a),
        }
    }
}

fn generate(generator: &mut RequestGenerator, anomaly_rate: f64) -> Generated {
    let roll: f64 = generator.rng.gen();
    if roll < 0.35 {
        Generated::Risk(generator.generate_risk())
    } else if roll < 0.5 {
        Generated::Route(generator.generate_route())
    } else if roll < 0.6 {
        Generated::Area(generator.generate_area())
    } else if generator.rng.gen_bool(anomaly_rate) {
        Generated::Anomaly {
            request: generator.generate_implausible(),
            implausible: true,
        }
    } else {
        Generated::Anomaly {
            request: generator.generate_plausible(),
            implausible: false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100);
    let anomaly_rate: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.2);
    let delay_ms: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        count = count,
        anomaly_rate = anomaly_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, anomaly_rate, delay_ms).await;
        }
    };

    let mut generator = RequestGenerator::new(50);
    let mut sent_implausible = 0;
    let mut flagged = 0;
    let mut rejected = 0;

    info!("Starting to send {} requests...", count);

    for i in 0..count {
        let generated = generate(&mut generator, anomaly_rate);
        if let Generated::Anomaly { implausible: true, .. } = generated {
            sent_implausible += 1;
        }

        let subject = generated.subject().to_string();
        let reply = client.request(subject, generated.payload()?.into()).await;

        match reply.map(|m| serde_json::from_slice::<Value>(&m.payload)) {
            Ok(Ok(body)) => {
                if body["ok"] != true {
                    rejected += 1;
                    warn!(error = %body["error"], "Request rejected");
                } else if body["result"]["flags"]
                    .as_array()
                    .map_or(false, |f| !f.is_empty())
                {
                    flagged += 1;
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Unreadable reply"),
            Err(e) => warn!(error = %e, "Request failed"),
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} implausible sequences, {} flagged, {} rejected)",
                i + 1,
                count,
                sent_implausible,
                flagged,
                rejected
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} requests ({} implausible sequences, {} flagged, {} rejected)",
        count, sent_implausible, flagged, rejected
    );

    Ok(())
}

async fn run_dry_mode(count: u64, anomaly_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new(50);

    for i in 0..count {
        let generated = generate(&mut generator, anomaly_rate);
        let json: Value = serde_json::from_slice(&generated.payload()?)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!(
                "Sample request {}:\n{}",
                i + 1,
                serde_json::to_string_pretty(&json)?
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
