//! Stored sample and chart shapes
//!
//! A [`MetricSample`] keeps the headline percentages as plain columns and the
//! complete [`DeviceMetrics`] bundle as JSON, so chart queries never have to
//! parse the bundle while the full record stays available.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeviceMetrics, InterfaceRecord};

/// One successful poll of one equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub equipment_id: u64,
    pub timestamp: DateTime<Utc>,

    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,

    /// Octets summed over every interface (switches only)
    pub traffic_in: Option<u64>,
    pub traffic_out: Option<u64>,

    pub metrics: DeviceMetrics,
}

impl MetricSample {
    pub fn new(equipment_id: u64, timestamp: DateTime<Utc>, metrics: DeviceMetrics) -> Self {
        let (cpu_percent, memory_percent, disk_percent, traffic_in, traffic_out) = match &metrics {
            DeviceMetrics::Server(server) => (
                server.cpu_percent,
                server.memory_percent(),
                (!server.disk.is_empty()).then_some(server.disk.percent),
                None,
                None,
            ),
            DeviceMetrics::Switch(switch) => {
                let (inbound, outbound) = switch.interfaces.iter().fold((0u64, 0u64), |acc, i| {
                    (
                        acc.0.saturating_add(i.traffic.in_octets),
                        acc.1.saturating_add(i.traffic.out_octets),
                    )
                });
                (None, None, None, Some(inbound), Some(outbound))
            }
        };

        Self {
            equipment_id,
            timestamp,
            cpu_percent,
            memory_percent,
            disk_percent,
            traffic_in,
            traffic_out,
            metrics,
        }
    }

    pub fn from_metrics(equipment_id: u64, metrics: DeviceMetrics) -> Self {
        Self::new(equipment_id, metrics.collected_at(), metrics)
    }

    fn interfaces(&self) -> Vec<InterfaceRecord> {
        match &self.metrics {
            DeviceMetrics::Switch(switch) => switch.interfaces.clone(),
            DeviceMetrics::Server(_) => Vec::new(),
        }
    }
}

/// Column-oriented series for dashboards
///
/// Every vector has one entry per sample. Missing values are 0, and servers
/// get an empty interface list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub timestamps: Vec<DateTime<Utc>>,
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub disk: Vec<f64>,
    pub interfaces: Vec<Vec<InterfaceRecord>>,
    pub traffic_in: Vec<u64>,
    pub traffic_out: Vec<u64>,
}

impl ChartSeries {
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        let mut sorted: Vec<&MetricSample> = samples.iter().collect();
        sorted.sort_by_key(|sample| sample.timestamp);

        let mut series = ChartSeries::default();
        for sample in sorted {
            series.timestamps.push(sample.timestamp);
            series.cpu.push(sample.cpu_percent.unwrap_or(0.0));
            series.memory.push(sample.memory_percent.unwrap_or(0.0));
            series.disk.push(sample.disk_percent.unwrap_or(0.0));
            series.interfaces.push(sample.interfaces());
            series.traffic_in.push(sample.traffic_in.unwrap_or(0));
            series.traffic_out.push(sample.traffic_out.unwrap_or(0));
        }
        series
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
