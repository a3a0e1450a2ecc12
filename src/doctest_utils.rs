// Internal utilities for documentation tests
// This file contains helper functions to generate BedMasterEx exports for doctests

use crate::Result;
use std::fmt::Write as _;
use std::path::Path;

/// One `Waveforms` element to generate
#[derive(Debug, Clone)]
pub struct SampleWaveform {
    pub collection_time: String,
    pub labels: Vec<String>,
    pub samples: usize,
    pub sample_rate: f64,
}

impl SampleWaveform {
    /// Channels sampled at 240 Hz
    pub fn new(collection_time: &str, labels: &[&str], samples: usize) -> Self {
        SampleWaveform {
            collection_time: collection_time.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            samples,
            sample_rate: 240.0,
        }
    }

    pub fn with_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

/// One `VitalSign` element to generate
#[derive(Debug, Clone)]
pub struct SampleVital {
    pub parameter: String,
    pub time: String,
    pub value: String,
    pub uom: String,
    pub low: String,
    pub high: String,
}

impl SampleVital {
    pub fn new(parameter: &str, time: &str, value: &str) -> Self {
        SampleVital {
            parameter: parameter.to_string(),
            time: time.to_string(),
            value: value.to_string(),
            uom: "bpm".to_string(),
            low: "50".to_string(),
            high: "120".to_string(),
        }
    }

    pub fn with_limits(mut self, low: &str, high: &str) -> Self {
        self.low = low.to_string();
        self.high = high.to_string();
        self
    }
}

/// Deterministic sample text: a sawtooth offset per channel
pub fn sample_text(channel: usize, samples: usize) -> String {
    (0..samples)
        .map(|i| ((i % 100) as i32 - 50 + channel as i32 * 10).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds an export with one `Segment` per waveform and one for the vitals
pub fn sample_xml(waveforms: &[SampleWaveform], vitals: &[SampleVital]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<BedMasterEx>\n");
    xml.push_str("  <FileInfo><Unit>ICU</Unit><Bed>07</Bed></FileInfo>\n");

    for w in waveforms {
        let _ = writeln!(xml, "  <Segment>");
        let _ = writeln!(
            xml,
            "    <Waveforms CollectionTime=\"{}\" CollectionTimeUTC=\"{}\">",
            w.collection_time, w.collection_time
        );
        for (i, label) in w.labels.iter().enumerate() {
            let _ = writeln!(
                xml,
                "      <WaveformData ID=\"{}\" Label=\"{}\" SampleRate=\"{}\" Samples=\"{}\" UOM=\"mV\">{}</WaveformData>",
                i + 1,
                label,
                w.sample_rate,
                w.samples,
                sample_text(i, w.samples)
            );
        }
        let _ = writeln!(xml, "    </Waveforms>");
        let _ = writeln!(xml, "  </Segment>");
    }

    if !vitals.is_empty() {
        let _ = writeln!(xml, "  <Segment>");
        let _ = writeln!(
            xml,
            "    <VitalSigns CollectionTime=\"{}\" CollectionTimeUTC=\"{}\">",
            vitals[0].time, vitals[0].time
        );
        for v in vitals {
            let _ = writeln!(
                xml,
                "      <VitalSign><Parameter>{}</Parameter><Time>{}</Time><Value UOM=\"{}\">{}</Value>\
                 <AlarmLimitLow>{}</AlarmLimitLow><AlarmLimitHigh>{}</AlarmLimitHigh></VitalSign>",
                v.parameter, v.time, v.uom, v.value, v.low, v.high
            );
        }
        let _ = writeln!(xml, "    </VitalSigns>");
        let _ = writeln!(xml, "  </Segment>");
    }

    xml.push_str("</BedMasterEx>\n");
    xml
}

/// Writes [`sample_xml`] to `path`
pub fn write_sample_xml<P: AsRef<Path>>(path: P, waveforms: &[SampleWaveform], vitals: &[SampleVital]) -> Result<()> {
    std::fs::write(path, sample_xml(waveforms, vitals))?;
    Ok(())
}
