//! Aircraft state tracking from decoded downlink records.
//!
//! Pure state machine: feed it frames plus a clock, read the aircraft map.
//! Each tracked field remembers when it was last updated and when its
//! value last changed, so consumers can age fields out individually.

use std::collections::HashMap;

use crate::decode::{
    AddressQualifier, AdsbRecord, AirGroundState, CapabilityCodes, EmergencyPriorityStatus,
    ModeIndicators, OperationalModes, SilSupplement,
};
use crate::types::RawFrame;

/// Messages older than this (against the caller's clock) are discarded.
const PAST_FUZZ_MS: u64 = 15_000;
/// Messages claiming to be from the future beyond this are discarded.
const FUTURE_FUZZ_MS: u64 = 1_000;

/// Aircraft are dropped after this long without a message.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

// ---------------------------------------------------------------------------
// Aged fields
// ---------------------------------------------------------------------------

/// A field value stamped with update and change times.
///
/// `updated` advances on every fresh observation; `changed` only when the
/// observed value differs from the held one. Monotonic: stale observations
/// are ignored.
#[derive(Debug, Clone)]
pub struct AgedField<T> {
    value: Option<T>,
    updated: u64,
    changed: u64,
}

impl<T> Default for AgedField<T> {
    fn default() -> Self {
        AgedField {
            value: None,
            updated: 0,
            changed: 0,
        }
    }
}

impl<T: PartialEq> AgedField<T> {
    pub fn valid(&self) -> bool {
        self.updated != 0
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn changed(&self) -> u64 {
        self.changed
    }

    pub fn update_age(&self, at: u64) -> u64 {
        at.saturating_sub(self.updated)
    }

    pub fn change_age(&self, at: u64) -> u64 {
        at.saturating_sub(self.changed)
    }

    pub fn maybe_update(&mut self, at: u64, v: T) -> bool {
        if at > self.updated {
            self.updated = at;
            if self.value.as_ref() != Some(&v) {
                self.changed = at;
            }
            self.value = Some(v);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Everything known about one transmitting aircraft.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub address_qualifier: AddressQualifier,
    pub address: u32,

    pub last_message_time: u64,
    pub messages: u32,
    rssi: [f32; 16],

    pub position: AgedField<(f64, f64)>,
    pub pressure_altitude: AgedField<i32>,
    pub geometric_altitude: AgedField<i32>,
    pub nic: AgedField<u32>,
    pub airground_state: AgedField<AirGroundState>,
    pub north_velocity: AgedField<i32>,
    pub east_velocity: AgedField<i32>,
    pub vertical_velocity_barometric: AgedField<i32>,
    pub vertical_velocity_geometric: AgedField<i32>,
    pub ground_speed: AgedField<i32>,
    pub magnetic_heading: AgedField<f64>,
    pub true_heading: AgedField<f64>,
    pub true_track: AgedField<f64>,
    pub aircraft_size: AgedField<(f64, f64)>,
    pub gps_lateral_offset: AgedField<f64>,
    pub gps_longitudinal_offset: AgedField<f64>,
    pub gps_position_offset_applied: AgedField<bool>,
    pub utc_coupled: AgedField<bool>,

    pub emitter_category: AgedField<u32>,
    pub callsign: AgedField<String>,
    pub flightplan_id: AgedField<String>,
    pub emergency: AgedField<EmergencyPriorityStatus>,
    pub mops_version: AgedField<u32>,
    pub sil: AgedField<u32>,
    pub transmit_mso: AgedField<u32>,
    pub sda: AgedField<u32>,
    pub nac_p: AgedField<u32>,
    pub nac_v: AgedField<u32>,
    pub nic_baro: AgedField<u32>,
    pub capability_codes: AgedField<CapabilityCodes>,
    pub operational_modes: AgedField<OperationalModes>,
    pub sil_supplement: AgedField<SilSupplement>,
    pub gva: AgedField<u32>,
    pub single_antenna: AgedField<bool>,
    pub nic_supplement: AgedField<bool>,

    /// Derived from NIC and the NIC supplement: containment radius upper
    /// bound in metres.
    pub horizontal_containment: AgedField<f64>,

    pub selected_altitude_mcp: AgedField<i32>,
    pub selected_altitude_fms: AgedField<i32>,
    pub barometric_pressure_setting: AgedField<f64>,
    pub selected_heading: AgedField<f64>,
    pub mode_indicators: AgedField<ModeIndicators>,
}

impl AircraftState {
    fn new(address_qualifier: AddressQualifier, address: u32) -> AircraftState {
        AircraftState {
            address_qualifier,
            address,
            last_message_time: 0,
            messages: 0,
            rssi: [0.0; 16],
            position: AgedField::default(),
            pressure_altitude: AgedField::default(),
            geometric_altitude: AgedField::default(),
            nic: AgedField::default(),
            airground_state: AgedField::default(),
            north_velocity: AgedField::default(),
            east_velocity: AgedField::default(),
            vertical_velocity_barometric: AgedField::default(),
            vertical_velocity_geometric: AgedField::default(),
            ground_speed: AgedField::default(),
            magnetic_heading: AgedField::default(),
            true_heading: AgedField::default(),
            true_track: AgedField::default(),
            aircraft_size: AgedField::default(),
            gps_lateral_offset: AgedField::default(),
            gps_longitudinal_offset: AgedField::default(),
            gps_position_offset_applied: AgedField::default(),
            utc_coupled: AgedField::default(),
            emitter_category: AgedField::default(),
            callsign: AgedField::default(),
            flightplan_id: AgedField::default(),
            emergency: AgedField::default(),
            mops_version: AgedField::default(),
            sil: AgedField::default(),
            transmit_mso: AgedField::default(),
            sda: AgedField::default(),
            nac_p: AgedField::default(),
            nac_v: AgedField::default(),
            nic_baro: AgedField::default(),
            capability_codes: AgedField::default(),
            operational_modes: AgedField::default(),
            sil_supplement: AgedField::default(),
            gva: AgedField::default(),
            single_antenna: AgedField::default(),
            nic_supplement: AgedField::default(),
            horizontal_containment: AgedField::default(),
            selected_altitude_mcp: AgedField::default(),
            selected_altitude_fms: AgedField::default(),
            barometric_pressure_setting: AgedField::default(),
            selected_heading: AgedField::default(),
            mode_indicators: AgedField::default(),
        }
    }

    /// Mean RSSI over the last 16 messages, dB.
    pub fn average_rssi(&self) -> f64 {
        if self.messages == 0 {
            return 0.0;
        }
        let n = (self.messages as usize).min(self.rssi.len());
        self.rssi.iter().map(|&r| r as f64).sum::<f64>() / n as f64
    }

    pub fn update_from_record(&mut self, record: &AdsbRecord) {
        if record.received_at < self.last_message_time {
            // out of order message
            return;
        }

        let at = record.received_at;

        macro_rules! update {
            ($field:ident) => {
                if let Some(v) = &record.$field {
                    self.$field.maybe_update(at, v.clone());
                }
            };
        }

        update!(position);
        update!(pressure_altitude);
        update!(geometric_altitude);
        update!(nic);
        update!(airground_state);
        update!(north_velocity);
        update!(east_velocity);
        update!(vertical_velocity_barometric);
        update!(vertical_velocity_geometric);
        update!(ground_speed);
        update!(magnetic_heading);
        update!(true_heading);
        update!(true_track);
        update!(aircraft_size);
        update!(gps_lateral_offset);
        update!(gps_longitudinal_offset);
        update!(gps_position_offset_applied);
        update!(utc_coupled);

        update!(emitter_category);
        update!(callsign);
        update!(flightplan_id);
        update!(emergency);
        update!(mops_version);
        update!(sil);
        update!(transmit_mso);
        update!(sda);
        update!(nac_p);
        update!(nac_v);
        update!(nic_baro);
        update!(capability_codes);
        update!(operational_modes);
        update!(sil_supplement);
        update!(gva);
        update!(single_antenna);
        update!(nic_supplement);

        update!(selected_altitude_mcp);
        update!(selected_altitude_fms);
        update!(barometric_pressure_setting);
        update!(selected_heading);
        update!(mode_indicators);

        if let Some(nic) = record.nic {
            let rc = self.containment_radius(nic);
            self.horizontal_containment.maybe_update(at, rc);
        }

        self.rssi[self.messages as usize % self.rssi.len()] = record.rssi;
        self.last_message_time = at;
        self.messages += 1;
    }

    /// DO-282B containment radius bound for a NIC value, metres.
    fn containment_radius(&self, nic: u32) -> f64 {
        match nic {
            1 => 37040.0,
            2 => 14816.0,
            3 => 7408.0,
            4 => 3704.0,
            5 => 1852.0,
            6 => {
                // NIC 6 is split by the NIC supplement flag
                if self.nic_supplement.value() == Some(&true) {
                    555.6
                } else {
                    1111.2
                }
            }
            7 => 370.4,
            8 => 185.2,
            9 => 75.0,
            10 => 25.0,
            11 => 7.5,
            _ => 0.0, // 0 unknown, 12..15 reserved
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub type AddressKey = (AddressQualifier, u32);

/// Track every aircraft heard on the link.
pub struct Tracker {
    timeout_ms: u64,
    aircraft: HashMap<AddressKey, AircraftState>,
    total_messages: u32,
}

impl Tracker {
    pub fn new(timeout_ms: u64) -> Tracker {
        Tracker {
            timeout_ms,
            aircraft: HashMap::new(),
            total_messages: 0,
        }
    }

    pub fn aircraft(&self) -> &HashMap<AddressKey, AircraftState> {
        &self.aircraft
    }

    pub fn total_messages(&self) -> u32 {
        self.total_messages
    }

    /// Process a batch of frames against the caller's clock (ms since
    /// epoch). Only contemporaneous downlink frames are tracked.
    pub fn handle_frames(&mut self, frames: &[RawFrame], now: u64) {
        for frame in frames {
            if !frame.is_downlink() {
                continue;
            }

            // only process messages that agree with our clock
            if frame.received_at == 0
                || frame.received_at < now.saturating_sub(PAST_FUZZ_MS)
                || frame.received_at > now + FUTURE_FUZZ_MS
            {
                continue;
            }

            self.handle_record(&AdsbRecord::decode(frame));
        }
    }

    fn handle_record(&mut self, record: &AdsbRecord) {
        let key = (record.address_qualifier, record.address);
        self.aircraft
            .entry(key)
            .or_insert_with(|| AircraftState::new(record.address_qualifier, record.address))
            .update_from_record(record);
        self.total_messages += 1;
    }

    /// Drop aircraft not heard from within the timeout.
    pub fn purge_old(&mut self, now: u64) {
        let expires = now.saturating_sub(self.timeout_ms);
        self.aircraft
            .retain(|_, state| state.last_message_time >= expires);
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Tracker::new(DEFAULT_TIMEOUT_MS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
