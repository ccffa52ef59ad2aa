//! Decode corrected downlink payloads into typed ADS-B records.
//!
//! Field layout follows DO-282B: a fixed header, then a composition of
//! State Vector, Mode Status, Auxiliary State Vector and Target State
//! sections selected by the payload type (Table 2-10). Every decoded field
//! is optional; absence means "not transmitted or not derivable".
//!
//! All bit-level access goes through [`bits`]/[`bit`]: byte and bit offsets
//! are 1-indexed with bit 1 the most significant bit of each byte. Reads
//! outside the payload are programming errors and panic; the section
//! decoders are gated so conformant (and hostile) inputs never reach one.

use serde::Serialize;
use serde_json::{json, Value};

use crate::types::{round_n, FrameKind, RawFrame};

// ---------------------------------------------------------------------------
// Bit extraction
// ---------------------------------------------------------------------------

/// Extract a single bit. `byte` and `bit` are 1-indexed, bit 1 is the MSB.
#[inline(always)]
pub fn bit(payload: &[u8], byte: usize, bit: usize) -> bool {
    assert!(byte >= 1);
    assert!((1..=8).contains(&bit));

    let bi = (byte - 1) * 8 + bit - 1;
    payload[bi >> 3] & (1 << (7 - (bi & 7))) != 0
}

/// Extract an arbitrary bit run of up to 32 bits, right-aligned.
///
/// Both endpoints are inclusive and 1-indexed, bit 1 the MSB of its byte.
#[inline(always)]
pub fn bits(
    payload: &[u8],
    first_byte: usize,
    first_bit: usize,
    last_byte: usize,
    last_bit: usize,
) -> u32 {
    assert!(first_byte >= 1);
    assert!((1..=8).contains(&first_bit));
    assert!(last_byte >= 1);
    assert!((1..=8).contains(&last_bit));

    let fbi = (first_byte - 1) * 8 + first_bit - 1;
    let lbi = (last_byte - 1) * 8 + last_bit - 1;
    assert!(fbi <= lbi);
    assert!(lbi - fbi + 1 <= 32);

    let fby = fbi >> 3;
    let lby = lbi >> 3;
    let shift = 7 - (lbi & 7);
    let topmask = 0xFFu64 >> (fbi & 7);

    assert!(payload.len() > lby, "bit range exceeds available data");

    let mut value = payload[fby] as u64 & topmask;
    for &b in &payload[fby + 1..=lby] {
        value = (value << 8) | b as u64;
    }
    (value >> shift) as u32
}

// ---------------------------------------------------------------------------
// Field enums
// ---------------------------------------------------------------------------

/// DO-282B 2.2.4.5.1.2 "ADDRESS QUALIFIER".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressQualifier {
    AdsbIcao,
    AdsbOther,
    TisbIcao,
    TisbTrackfile,
    Vehicle,
    FixedBeacon,
    AdsrOther,
    Reserved,
}

impl AddressQualifier {
    fn from_bits(v: u32) -> AddressQualifier {
        match v {
            0 => AddressQualifier::AdsbIcao,
            1 => AddressQualifier::AdsbOther,
            2 => AddressQualifier::TisbIcao,
            3 => AddressQualifier::TisbTrackfile,
            4 => AddressQualifier::Vehicle,
            5 => AddressQualifier::FixedBeacon,
            6 => AddressQualifier::AdsrOther,
            _ => AddressQualifier::Reserved,
        }
    }
}

/// DO-282B 2.2.4.5.2.5 "A/G STATE".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirGroundState {
    #[serde(rename = "airborne")]
    AirborneSubsonic,
    #[serde(rename = "supersonic")]
    AirborneSupersonic,
    #[serde(rename = "ground")]
    OnGround,
    Reserved,
}

impl AirGroundState {
    fn from_bits(v: u32) -> AirGroundState {
        match v {
            0 => AirGroundState::AirborneSubsonic,
            1 => AirGroundState::AirborneSupersonic,
            2 => AirGroundState::OnGround,
            _ => AirGroundState::Reserved,
        }
    }
}

/// DO-282B 2.2.4.5.2.7.1.1 "VV Src".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalVelocitySource {
    Geometric,
    Barometric,
}

/// DO-282B 2.2.4.5.4.4 "EMERGENCY/PRIORITY STATUS".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyPriorityStatus {
    None,
    General,
    Medical,
    Minfuel,
    Nordo,
    Unlawful,
    Downed,
    Reserved,
}

impl EmergencyPriorityStatus {
    fn from_bits(v: u32) -> EmergencyPriorityStatus {
        match v {
            0 => EmergencyPriorityStatus::None,
            1 => EmergencyPriorityStatus::General,
            2 => EmergencyPriorityStatus::Medical,
            3 => EmergencyPriorityStatus::Minfuel,
            4 => EmergencyPriorityStatus::Nordo,
            5 => EmergencyPriorityStatus::Unlawful,
            6 => EmergencyPriorityStatus::Downed,
            _ => EmergencyPriorityStatus::Reserved,
        }
    }
}

/// DO-282B 2.2.4.5.4.16 SIL Supplement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilSupplement {
    PerHour,
    PerSample,
}

/// DO-282B 2.2.4.5.6.1 "Selected Altitude Type (SAT)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedAltitudeType {
    McpFcu,
    Fms,
}

/// DO-282B 2.2.4.5.4.12 "CAPABILITY CODES".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityCodes {
    pub uat_in: bool,
    pub es_in: bool,
    pub tcas_operational: bool,
}

/// DO-282B 2.2.4.5.4.13 "OPERATIONAL MODES".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationalModes {
    pub tcas_ra_active: bool,
    pub ident_active: bool,
    pub atc_services: bool,
}

/// DO-282B 2.2.4.5.6.5 - 2.2.4.5.6.10 Mode Indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeIndicators {
    pub autopilot: bool,
    pub vnav: bool,
    pub altitude_hold: bool,
    pub approach: bool,
    pub lnav: bool,
}

/// DO-282B Table 2-35 aircraft length/width codes, metres.
const AIRCRAFT_SIZES: [(f64, f64); 16] = [
    (0.0, 0.0), // no data
    (15.0, 23.0),
    (25.0, 28.5),
    (25.0, 34.0),
    (35.0, 33.0),
    (35.0, 38.0),
    (45.0, 39.5),
    (45.0, 45.0),
    (55.0, 45.0),
    (55.0, 52.0),
    (65.0, 59.5),
    (65.0, 67.0),
    (75.0, 72.5),
    (75.0, 80.0),
    (85.0, 80.0),
    (85.0, 90.0),
];

const BASE40_ALPHABET: &[u8; 40] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ *??";

// ---------------------------------------------------------------------------
// Decoded record
// ---------------------------------------------------------------------------

/// A decoded downlink ADS-B record. One is produced per corrected downlink
/// frame; uplink frames pass through the system as opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AdsbRecord {
    // Metadata copied from the raw frame
    pub received_at: u64,
    pub raw_timestamp: u64,
    pub errors: usize,
    pub rssi: f32,

    // HDR
    pub payload_type: u32,
    pub address_qualifier: AddressQualifier,
    pub address: u32,

    // State Vector
    pub position: Option<(f64, f64)>, // latitude, longitude
    pub pressure_altitude: Option<i32>,
    pub geometric_altitude: Option<i32>,
    pub nic: Option<u32>,
    pub airground_state: Option<AirGroundState>,
    pub north_velocity: Option<i32>,
    pub east_velocity: Option<i32>,
    pub vv_src: Option<VerticalVelocitySource>,
    pub vertical_velocity_barometric: Option<i32>,
    pub vertical_velocity_geometric: Option<i32>,
    pub ground_speed: Option<i32>,
    pub magnetic_heading: Option<f64>,
    pub true_heading: Option<f64>,
    pub true_track: Option<f64>,
    pub aircraft_size: Option<(f64, f64)>, // length, width
    pub gps_lateral_offset: Option<f64>,
    pub gps_longitudinal_offset: Option<f64>,
    pub gps_position_offset_applied: Option<bool>,
    pub utc_coupled: Option<bool>,    // ADS-B
    pub uplink_feedback: Option<u32>, // ADS-B
    pub tisb_site_id: Option<u32>,    // TIS-B / ADS-R

    // Mode Status
    pub emitter_category: Option<u32>,
    pub callsign: Option<String>,
    pub flightplan_id: Option<String>, // aka Mode 3/A squawk
    pub emergency: Option<EmergencyPriorityStatus>,
    pub mops_version: Option<u32>,
    pub sil: Option<u32>,
    pub transmit_mso: Option<u32>,
    pub sda: Option<u32>,
    pub nac_p: Option<u32>,
    pub nac_v: Option<u32>,
    pub nic_baro: Option<u32>,
    pub capability_codes: Option<CapabilityCodes>,
    pub operational_modes: Option<OperationalModes>,
    pub sil_supplement: Option<SilSupplement>,
    pub gva: Option<u32>,
    pub single_antenna: Option<bool>,
    pub nic_supplement: Option<bool>,

    // Target State
    pub selected_altitude_type: Option<SelectedAltitudeType>,
    pub selected_altitude_mcp: Option<i32>,
    pub selected_altitude_fms: Option<i32>,
    pub barometric_pressure_setting: Option<f64>,
    pub selected_heading: Option<f64>,
    pub mode_indicators: Option<ModeIndicators>,
}

impl AdsbRecord {
    /// Decode a corrected downlink frame.
    ///
    /// Panics if handed anything but a downlink frame; callers route by
    /// [`RawFrame::is_downlink`] first.
    pub fn decode(frame: &RawFrame) -> AdsbRecord {
        assert!(
            frame.is_downlink(),
            "can't decode this sort of frame as a downlink ADS-B record"
        );

        let p = frame.payload();
        let mut record = AdsbRecord {
            received_at: frame.received_at,
            raw_timestamp: frame.raw_timestamp,
            errors: frame.errors,
            rssi: frame.rssi,
            payload_type: bits(p, 1, 1, 1, 5),
            address_qualifier: AddressQualifier::from_bits(bits(p, 1, 6, 1, 8)),
            address: bits(p, 2, 1, 4, 8),
            position: None,
            pressure_altitude: None,
            geometric_altitude: None,
            nic: None,
            airground_state: None,
            north_velocity: None,
            east_velocity: None,
            vv_src: None,
            vertical_velocity_barometric: None,
            vertical_velocity_geometric: None,
            ground_speed: None,
            magnetic_heading: None,
            true_heading: None,
            true_track: None,
            aircraft_size: None,
            gps_lateral_offset: None,
            gps_longitudinal_offset: None,
            gps_position_offset_applied: None,
            utc_coupled: None,
            uplink_feedback: None,
            tisb_site_id: None,
            emitter_category: None,
            callsign: None,
            flightplan_id: None,
            emergency: None,
            mops_version: None,
            sil: None,
            transmit_mso: None,
            sda: None,
            nac_p: None,
            nac_v: None,
            nic_baro: None,
            capability_codes: None,
            operational_modes: None,
            sil_supplement: None,
            gva: None,
            single_antenna: None,
            nic_supplement: None,
            selected_altitude_type: None,
            selected_altitude_mcp: None,
            selected_altitude_fms: None,
            barometric_pressure_setting: None,
            selected_heading: None,
            mode_indicators: None,
        };

        // DO-282B Table 2-10 "Composition of the ADS-B Payload".
        // MS/TS/AUXSV live past byte 17 and so only exist in long frames;
        // the FEC layer guarantees type 0 frames are short, but a crafted
        // raw line could pair a short payload with a nonzero type.
        let long = frame.kind() == FrameKind::DownlinkLong;
        match record.payload_type {
            0 => record.decode_sv(p),
            1 => {
                record.decode_sv(p);
                if long {
                    record.decode_ms(p);
                    record.decode_auxsv(p);
                }
            }
            2 | 5 => {
                record.decode_sv(p);
                if long {
                    record.decode_auxsv(p);
                }
            }
            3 => {
                record.decode_sv(p);
                if long {
                    record.decode_ms(p);
                    record.decode_ts(p, 30);
                }
            }
            4 => {
                record.decode_sv(p);
                if long {
                    record.decode_ts(p, 30);
                }
            }
            6 => {
                record.decode_sv(p);
                if long {
                    record.decode_ts(p, 25);
                    record.decode_auxsv(p);
                }
            }
            7..=10 => record.decode_sv(p),
            _ => {} // 11..31: HDR only
        }

        record
    }

    /// State Vector, payload bytes 5-17.
    fn decode_sv(&mut self, p: &[u8]) {
        let raw_lat = bits(p, 5, 1, 7, 7);
        let raw_lon = bits(p, 7, 8, 10, 7);

        let raw_alt = bits(p, 11, 1, 12, 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            if bit(p, 10, 8) {
                // 2.2.4.5.2.2 "ALTITUDE TYPE"
                self.geometric_altitude = Some(altitude);
            } else {
                self.pressure_altitude = Some(altitude);
            }
        }

        let nic = bits(p, 12, 5, 12, 8);
        self.nic = Some(nic);

        if raw_lat != 0 || raw_lon != 0 || nic != 0 {
            // north and south pole encode identically; we pick north
            let mut lat = raw_lat as f64 * 360.0 / 16777216.0;
            if lat > 90.0 {
                lat -= 180.0;
            }
            let mut lon = raw_lon as f64 * 360.0 / 16777216.0;
            if lon > 180.0 {
                lon -= 360.0;
            }
            self.position = Some((round_n(lat, 5), round_n(lon, 5)));
        }

        let airground = AirGroundState::from_bits(bits(p, 13, 1, 13, 2));
        self.airground_state = Some(airground);

        // bit 13,3 reserved

        match airground {
            AirGroundState::AirborneSubsonic | AirGroundState::AirborneSupersonic => {
                let supersonic = if airground == AirGroundState::AirborneSupersonic {
                    4
                } else {
                    1
                };

                let ns_sign = if bit(p, 13, 4) { -1 } else { 1 };
                let raw_ns = bits(p, 13, 5, 14, 6);
                if raw_ns != 0 {
                    self.north_velocity = Some(supersonic * ns_sign * (raw_ns as i32 - 1));
                }

                let ew_sign = if bit(p, 14, 7) { -1 } else { 1 };
                let raw_ew = bits(p, 14, 8, 16, 1);
                if raw_ew != 0 {
                    self.east_velocity = Some(supersonic * ew_sign * (raw_ew as i32 - 1));
                }

                // derive groundspeed and true track for convenience;
                // presence matters here, not non-zero values
                if let (Some(n), Some(e)) = (self.north_velocity, self.east_velocity) {
                    let n = n as f64;
                    let e = e as f64;
                    self.ground_speed = Some(round_n((n * n + e * e).sqrt(), 1) as i32);
                    let mut angle = e.atan2(n).to_degrees();
                    if angle < 0.0 {
                        angle += 360.0;
                    }
                    self.true_track = Some(round_n(angle, 1));
                }

                let vv_src = if bits(p, 16, 2, 16, 2) != 0 {
                    VerticalVelocitySource::Barometric
                } else {
                    VerticalVelocitySource::Geometric
                };
                self.vv_src = Some(vv_src);
                let vv_sign = if bit(p, 16, 3) { -1 } else { 1 };
                let raw_vv = bits(p, 16, 4, 17, 4);
                if raw_vv != 0 {
                    let vertical_velocity = vv_sign * (raw_vv as i32 - 1) * 64;
                    match vv_src {
                        VerticalVelocitySource::Barometric => {
                            self.vertical_velocity_barometric = Some(vertical_velocity);
                        }
                        VerticalVelocitySource::Geometric => {
                            self.vertical_velocity_geometric = Some(vertical_velocity);
                        }
                    }
                }
            }

            AirGroundState::OnGround => {
                // 13,4 reserved
                let raw_gs = bits(p, 13, 5, 14, 6);
                if raw_gs != 0 {
                    self.ground_speed = Some(raw_gs as i32 - 1);
                }

                let tah_type = bits(p, 14, 7, 14, 8);
                let angle = round_n(bits(p, 15, 1, 16, 1) as f64 * 360.0 / 512.0, 1);
                match tah_type {
                    // 2.2.4.5.2.6.4 / Table 2-28 "Track Angle/Heading Type"
                    1 => self.true_track = Some(angle),
                    2 => self.magnetic_heading = Some(angle),
                    3 => self.true_heading = Some(angle),
                    _ => {} // 0: data unavailable
                }

                let raw_av_size = bits(p, 16, 2, 16, 5);
                if raw_av_size != 0 {
                    self.aircraft_size = Some(AIRCRAFT_SIZES[raw_av_size as usize]);
                }

                if bit(p, 16, 7) {
                    // longitudinal GPS offset
                    let raw_gps_long = bits(p, 16, 8, 17, 4);
                    if raw_gps_long != 0 {
                        if raw_gps_long == 1 {
                            self.gps_position_offset_applied = Some(true);
                        } else {
                            self.gps_position_offset_applied = Some(false);
                            self.gps_longitudinal_offset = Some((raw_gps_long as f64 - 1.0) * 2.0);
                        }
                    }
                } else {
                    // lateral GPS offset; left is negative by convention
                    let raw_gps_lat = bits(p, 16, 8, 17, 2);
                    if raw_gps_lat != 0 {
                        if raw_gps_lat <= 3 {
                            self.gps_lateral_offset = Some(raw_gps_lat as f64 * -2.0);
                        } else {
                            self.gps_lateral_offset = Some((raw_gps_lat as f64 - 4.0) * 2.0);
                        }
                    }
                }
            }

            AirGroundState::Reserved => {}
        }

        match self.address_qualifier {
            AddressQualifier::AdsbIcao
            | AddressQualifier::AdsbOther
            | AddressQualifier::Vehicle
            | AddressQualifier::FixedBeacon => {
                self.utc_coupled = Some(bit(p, 17, 5));
                self.uplink_feedback = Some(bits(p, 17, 6, 17, 8));
            }
            AddressQualifier::TisbIcao
            | AddressQualifier::TisbTrackfile
            | AddressQualifier::AdsrOther => {
                self.tisb_site_id = Some(bits(p, 17, 5, 17, 8));
            }
            AddressQualifier::Reserved => {}
        }
    }

    /// Mode Status, payload bytes 18-29.
    fn decode_ms(&mut self, p: &[u8]) {
        let raw1 = bits(p, 18, 1, 19, 8);
        let raw2 = bits(p, 20, 1, 21, 8);
        let raw3 = bits(p, 22, 1, 23, 8);

        self.emitter_category = Some((raw1 / 1600) % 40);

        let mut raw_callsign = String::with_capacity(8);
        for code in [
            (raw1 / 40) % 40,
            raw1 % 40,
            (raw2 / 1600) % 40,
            (raw2 / 40) % 40,
            raw2 % 40,
            (raw3 / 1600) % 40,
            (raw3 / 40) % 40,
            raw3 % 40,
        ] {
            raw_callsign.push(BASE40_ALPHABET[code as usize] as char);
        }

        // trim trailing spaces and code 37
        while raw_callsign.ends_with(' ') || raw_callsign.ends_with('*') {
            raw_callsign.pop();
        }

        if !raw_callsign.is_empty() {
            // CSID: 1 = callsign, 0 = flightplan ID (aka squawk)
            if bit(p, 27, 7) {
                self.callsign = Some(raw_callsign);
            } else {
                self.flightplan_id = Some(raw_callsign);
            }
        }

        self.emergency = Some(EmergencyPriorityStatus::from_bits(bits(p, 24, 1, 24, 3)));
        self.mops_version = Some(bits(p, 24, 4, 24, 6));
        self.sil = Some(bits(p, 24, 7, 24, 8));
        self.transmit_mso = Some(bits(p, 25, 1, 25, 6));
        self.sda = Some(bits(p, 25, 7, 25, 8));
        self.nac_p = Some(bits(p, 26, 1, 26, 4));
        self.nac_v = Some(bits(p, 26, 5, 26, 7));
        self.nic_baro = Some(bits(p, 26, 8, 26, 8));

        self.capability_codes = Some(CapabilityCodes {
            uat_in: bit(p, 27, 1),
            es_in: bit(p, 27, 2),
            tcas_operational: bit(p, 27, 3),
        });
        self.operational_modes = Some(OperationalModes {
            tcas_ra_active: bit(p, 27, 4),
            ident_active: bit(p, 27, 5),
            atc_services: bit(p, 27, 6),
        });

        self.sil_supplement = Some(if bits(p, 27, 8, 27, 8) != 0 {
            SilSupplement::PerSample
        } else {
            SilSupplement::PerHour
        });
        self.gva = Some(bits(p, 28, 1, 28, 2));
        self.single_antenna = Some(bit(p, 28, 3));
        self.nic_supplement = Some(bit(p, 28, 4));
        // 28,5 .. 29,8 reserved
    }

    /// Target State; starts at byte 30 in payload types 3 and 4, byte 25
    /// in payload type 6.
    fn decode_ts(&mut self, p: &[u8], startbyte: usize) {
        let raw_altitude = bits(p, startbyte, 2, startbyte + 1, 4);
        if raw_altitude != 0 {
            let sat = if bits(p, startbyte, 1, startbyte, 1) != 0 {
                SelectedAltitudeType::Fms
            } else {
                SelectedAltitudeType::McpFcu
            };
            self.selected_altitude_type = Some(sat);
            let altitude = (raw_altitude as i32 - 1) * 32;
            match sat {
                SelectedAltitudeType::McpFcu => self.selected_altitude_mcp = Some(altitude),
                SelectedAltitudeType::Fms => self.selected_altitude_fms = Some(altitude),
            }
        }

        let raw_bps = bits(p, startbyte + 1, 5, startbyte + 2, 5);
        if raw_bps != 0 {
            self.barometric_pressure_setting = Some(800.0 + (raw_bps as f64 - 1.0) * 0.8);
        }

        if bit(p, startbyte + 2, 6) {
            let heading_sign = if bit(p, startbyte + 2, 7) { -1.0 } else { 1.0 };
            let heading = round_n(
                bits(p, startbyte + 2, 8, startbyte + 3, 7) as f64 * 180.0 / 256.0,
                1,
            );
            self.selected_heading = Some(heading_sign * heading);
        }

        if bit(p, startbyte + 3, 8) {
            self.mode_indicators = Some(ModeIndicators {
                autopilot: bit(p, startbyte + 4, 1),
                vnav: bit(p, startbyte + 4, 2),
                altitude_hold: bit(p, startbyte + 4, 3),
                approach: bit(p, startbyte + 4, 4),
                lnav: bit(p, startbyte + 4, 5),
            });
        }

        // 34,6 .. 34,8 reserved
    }

    /// Auxiliary State Vector, payload bytes 30-33.
    ///
    /// The secondary altitude is routed to whichever channel the primary SV
    /// altitude did not use; the governing bit is 10,8 in the SV.
    fn decode_auxsv(&mut self, p: &[u8]) {
        let raw_alt = bits(p, 30, 1, 31, 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            if bit(p, 10, 8) {
                self.pressure_altitude = Some(altitude);
            } else {
                self.geometric_altitude = Some(altitude);
            }
        }
    }

    /// Render the record as one JSON object: enum fields as strings,
    /// address as 6 hex digits, absent fields omitted, metadata always
    /// present.
    pub fn to_json(&self) -> Value {
        let mut o = serde_json::Map::new();

        o.insert("address_qualifier".into(), json!(self.address_qualifier));
        o.insert("address".into(), json!(format!("{:06x}", self.address)));

        macro_rules! emit {
            ($field:ident) => {
                if let Some(v) = &self.$field {
                    o.insert(stringify!($field).into(), json!(v));
                }
            };
        }

        if let Some((lat, lon)) = self.position {
            o.insert("position".into(), json!({ "lat": lat, "lon": lon }));
        }

        emit!(pressure_altitude);
        emit!(geometric_altitude);
        emit!(nic);
        emit!(airground_state);
        emit!(north_velocity);
        emit!(east_velocity);
        emit!(vv_src);
        emit!(vertical_velocity_barometric);
        emit!(vertical_velocity_geometric);
        emit!(ground_speed);
        emit!(magnetic_heading);
        emit!(true_heading);
        emit!(true_track);

        if let Some((length, width)) = self.aircraft_size {
            o.insert(
                "aircraft_size".into(),
                json!({ "length": length, "width": width }),
            );
        }

        emit!(gps_lateral_offset);
        emit!(gps_longitudinal_offset);
        emit!(gps_position_offset_applied);
        emit!(utc_coupled);
        emit!(uplink_feedback);
        emit!(tisb_site_id);

        if let Some(category) = self.emitter_category {
            let name = format!(
                "{}{}",
                (b'A' + (category >> 3) as u8) as char,
                (b'0' + (category & 7) as u8) as char
            );
            o.insert("emitter_category".into(), json!(name));
        }

        emit!(callsign);
        emit!(flightplan_id);
        emit!(emergency);
        emit!(mops_version);
        emit!(sil);
        emit!(transmit_mso);
        emit!(sda);
        emit!(nac_p);
        emit!(nac_v);
        emit!(nic_baro);
        emit!(capability_codes);
        emit!(operational_modes);
        emit!(sil_supplement);
        emit!(gva);
        emit!(single_antenna);
        emit!(nic_supplement);
        emit!(selected_altitude_type);
        emit!(selected_altitude_mcp);
        emit!(selected_altitude_fms);
        emit!(barometric_pressure_setting);
        emit!(selected_heading);
        emit!(mode_indicators);

        let mut metadata = serde_json::Map::new();
        metadata.insert("rssi".into(), json!(round_n(self.rssi as f64, 1)));
        metadata.insert("errors".into(), json!(self.errors));
        if self.received_at != 0 {
            metadata.insert("received_at".into(), json!(self.received_at as f64 / 1000.0));
        }
        if self.raw_timestamp != 0 {
            metadata.insert("raw_timestamp".into(), json!(self.raw_timestamp));
        }
        o.insert("metadata".into(), Value::Object(metadata));

        Value::Object(o)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of `bits`: pack `value` into the given 1-indexed bit range.
    fn set_bits(
        payload: &mut [u8],
        first_byte: usize,
        first_bit: usize,
        last_byte: usize,
        last_bit: usize,
        value: u32,
    ) {
        let fbi = (first_byte - 1) * 8 + first_bit - 1;
        let lbi = (last_byte - 1) * 8 + last_bit - 1;
        let nbi = lbi - fbi + 1;
        assert!(nbi <= 32);
        assert!((value as u64) < (1u64 << nbi));

        for k in 0..nbi {
            let v = (value >> (nbi - 1 - k)) & 1;
            let bi = fbi + k;
            let mask = 1u8 << (7 - (bi & 7));
            if v != 0 {
                payload[bi >> 3] |= mask;
            } else {
                payload[bi >> 3] &= !mask;
            }
        }
    }

    fn short_frame(payload: [u8; 18]) -> RawFrame {
        RawFrame::new(payload.to_vec(), 0, 0, 0.0)
    }

    fn long_frame(payload: [u8; 34]) -> RawFrame {
        RawFrame::new(payload.to_vec(), 0, 0, 0.0)
    }

    // -- bit extraction --

    #[test]
    fn test_bits_concatenation_semantics() {
        // On a counting payload the helper must agree with naive
        // bit-by-bit concatenation
        let payload: Vec<u8> = (1..=8u8).collect();

        let naive = |fb: usize, fbit: usize, lb: usize, lbit: usize| -> u32 {
            let fbi = (fb - 1) * 8 + fbit - 1;
            let lbi = (lb - 1) * 8 + lbit - 1;
            let mut v = 0u32;
            for bi in fbi..=lbi {
                let b = payload[bi >> 3] & (1 << (7 - (bi & 7))) != 0;
                v = (v << 1) | b as u32;
            }
            v
        };

        assert_eq!(bits(&payload, 1, 1, 1, 8), 0x01);
        assert_eq!(bits(&payload, 1, 1, 4, 8), 0x01020304);
        assert_eq!(bits(&payload, 1, 5, 2, 4), 0x10);
        assert_eq!(bits(&payload, 2, 1, 2, 1), 0);
        assert_eq!(bits(&payload, 5, 1, 8, 8), 0x05060708);

        for (fb, fbit, lb, lbit) in [
            (1, 1, 1, 1),
            (1, 3, 1, 7),
            (1, 8, 2, 1),
            (2, 2, 4, 5),
            (3, 7, 7, 6),
            (1, 1, 4, 8),
            (4, 5, 8, 4),
        ] {
            assert_eq!(
                bits(&payload, fb, fbit, lb, lbit),
                naive(fb, fbit, lb, lbit),
                "range {fb},{fbit}..{lb},{lbit}"
            );
        }
    }

    #[test]
    fn test_bit_single() {
        let payload = [0b1010_0001u8, 0b0000_0001];
        assert!(bit(&payload, 1, 1));
        assert!(!bit(&payload, 1, 2));
        assert!(bit(&payload, 1, 3));
        assert!(bit(&payload, 1, 8));
        assert!(!bit(&payload, 2, 1));
        assert!(bit(&payload, 2, 8));
    }

    #[test]
    #[should_panic(expected = "bit range exceeds available data")]
    fn test_bits_out_of_range_panics() {
        let payload = [0u8; 4];
        bits(&payload, 4, 1, 5, 8);
    }

    // -- HDR --

    #[test]
    fn test_header_fields() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 1, 1, 1, 5, 0); // payload type 0
        set_bits(&mut p, 1, 6, 1, 8, 0); // ADS-B ICAO
        set_bits(&mut p, 2, 1, 4, 8, 0xABCDEF);

        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.payload_type, 0);
        assert_eq!(record.address_qualifier, AddressQualifier::AdsbIcao);
        assert_eq!(record.address, 0xABCDEF);
    }

    #[test]
    fn test_minimal_short_frame_record() {
        // all-zero SV: no position, no altitude, no velocities
        let mut p = [0u8; 18];
        set_bits(&mut p, 2, 1, 4, 8, 0xABCDEF);

        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.position, None);
        assert_eq!(record.pressure_altitude, None);
        assert_eq!(record.geometric_altitude, None);
        assert_eq!(record.nic, Some(0));
        assert_eq!(record.airground_state, Some(AirGroundState::AirborneSubsonic));
        assert_eq!(record.north_velocity, None);
        assert_eq!(record.ground_speed, None);
        assert_eq!(record.callsign, None);

        let json = record.to_json();
        assert_eq!(json["address"], "abcdef");
        assert_eq!(json["address_qualifier"], "adsb_icao");
        assert!(json.get("position").is_none());
        assert!(json.get("callsign").is_none());
    }

    // -- State Vector --

    #[test]
    fn test_sv_position_decoding() {
        // KSFO-ish coordinates; expected values follow the 24-bit raw
        // angle grid after rounding to 5 decimal places
        let raw_lat = (37.619f64 * 16777216.0 / 360.0).round() as u32;
        let raw_lon = ((360.0 - 122.375f64) * 16777216.0 / 360.0).round() as u32;

        let mut p = [0u8; 18];
        set_bits(&mut p, 5, 1, 7, 7, raw_lat);
        set_bits(&mut p, 7, 8, 10, 7, raw_lon);
        set_bits(&mut p, 12, 5, 12, 8, 8); // nic

        let record = AdsbRecord::decode(&short_frame(p));
        let (lat, lon) = record.position.expect("position present");
        assert!((lat - 37.619).abs() < 1.5e-5, "lat={lat}");
        assert!((lon + 122.375).abs() < 1.5e-5, "lon={lon}");
        // values are rounded to 5 dp
        assert_eq!(lat, round_n(lat, 5));
        assert_eq!(lon, round_n(lon, 5));
        assert_eq!(record.nic, Some(8));
    }

    #[test]
    fn test_sv_position_suppressed_when_all_zero() {
        let p = [0u8; 18];
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.position, None);
    }

    #[test]
    fn test_sv_position_present_when_only_nic_nonzero() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 12, 5, 12, 8, 6);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.position, Some((0.0, 0.0)));
    }

    #[test]
    fn test_sv_altitude_routing() {
        // raw altitude n decodes to (n - 41) * 25 ft
        let mut p = [0u8; 18];
        set_bits(&mut p, 11, 1, 12, 4, 41 + 1000 / 25);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.pressure_altitude, Some(1000));
        assert_eq!(record.geometric_altitude, None);

        set_bits(&mut p, 10, 8, 10, 8, 1); // altitude type: geometric
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.geometric_altitude, Some(1000));
        assert_eq!(record.pressure_altitude, None);
    }

    #[test]
    fn test_sv_airborne_velocity() {
        let mut p = [0u8; 18];
        // north 100 ft/s, east -50 ft/s
        set_bits(&mut p, 13, 5, 14, 6, 101);
        set_bits(&mut p, 14, 7, 14, 7, 1); // east sign: negative
        set_bits(&mut p, 14, 8, 16, 1, 51);

        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.north_velocity, Some(100));
        assert_eq!(record.east_velocity, Some(-50));
        assert_eq!(record.ground_speed, Some(111)); // trunc(111.8)
        let track = record.true_track.unwrap();
        assert!((track - 333.4).abs() < 0.05, "track={track}"); // atan2(-50,100)

        // supersonic scales by 4
        set_bits(&mut p, 13, 1, 13, 2, 1);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.airground_state, Some(AirGroundState::AirborneSupersonic));
        assert_eq!(record.north_velocity, Some(400));
        assert_eq!(record.east_velocity, Some(-200));
    }

    #[test]
    fn test_sv_velocity_magnitude_zero_is_absent() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 13, 5, 14, 6, 0); // north unavailable
        set_bits(&mut p, 14, 8, 16, 1, 7); // east available
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.north_velocity, None);
        assert_eq!(record.east_velocity, Some(6));
        // one missing component: no derived speed or track
        assert_eq!(record.ground_speed, None);
        assert_eq!(record.true_track, None);
    }

    #[test]
    fn test_sv_vertical_velocity() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 16, 2, 16, 2, 1); // barometric source
        set_bits(&mut p, 16, 3, 16, 3, 1); // down
        set_bits(&mut p, 16, 4, 17, 4, 11); // (11-1)*64 = 640 fpm
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.vv_src, Some(VerticalVelocitySource::Barometric));
        assert_eq!(record.vertical_velocity_barometric, Some(-640));
        assert_eq!(record.vertical_velocity_geometric, None);

        set_bits(&mut p, 16, 2, 16, 2, 0); // geometric source
        set_bits(&mut p, 16, 3, 16, 3, 0); // up
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.vertical_velocity_geometric, Some(640));
        assert_eq!(record.vertical_velocity_barometric, None);
    }

    #[test]
    fn test_sv_ground_heading_types() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 13, 1, 13, 2, 2); // on ground
        set_bits(&mut p, 15, 1, 16, 1, 256); // 256 * 360 / 512 = 180 degrees

        // TAH 2: magnetic heading
        set_bits(&mut p, 14, 7, 14, 8, 2);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.magnetic_heading, Some(180.0));
        assert_eq!(record.true_track, None);
        assert_eq!(record.true_heading, None);

        let json = record.to_json();
        assert_eq!(json["magnetic_heading"], 180.0);
        assert!(json.get("true_track").is_none());

        // TAH 1: true track
        set_bits(&mut p, 14, 7, 14, 8, 1);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.true_track, Some(180.0));
        assert_eq!(record.magnetic_heading, None);

        // TAH 0: unavailable
        set_bits(&mut p, 14, 7, 14, 8, 0);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.true_track, None);
        assert_eq!(record.magnetic_heading, None);
        assert_eq!(record.true_heading, None);
    }

    #[test]
    fn test_sv_ground_speed_and_size() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 13, 1, 13, 2, 2); // on ground
        set_bits(&mut p, 13, 5, 14, 6, 16); // 15 kt
        set_bits(&mut p, 16, 2, 16, 5, 7); // size code 7

        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.ground_speed, Some(15));
        assert_eq!(record.aircraft_size, Some((45.0, 45.0)));

        let json = record.to_json();
        assert_eq!(json["aircraft_size"]["length"], 45.0);
        assert_eq!(json["aircraft_size"]["width"], 45.0);
    }

    #[test]
    fn test_sv_gps_offsets() {
        // lateral, left of centerline
        let mut p = [0u8; 18];
        set_bits(&mut p, 13, 1, 13, 2, 2);
        set_bits(&mut p, 16, 7, 16, 7, 0); // lateral select
        set_bits(&mut p, 16, 8, 17, 2, 2);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.gps_lateral_offset, Some(-4.0));

        // lateral, right of centerline
        set_bits(&mut p, 16, 8, 17, 2, 6);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.gps_lateral_offset, Some(4.0));

        // longitudinal sentinel: position offset applied
        let mut p = [0u8; 18];
        set_bits(&mut p, 13, 1, 13, 2, 2);
        set_bits(&mut p, 16, 7, 16, 7, 1); // longitudinal select
        set_bits(&mut p, 16, 8, 17, 4, 1);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.gps_position_offset_applied, Some(true));
        assert_eq!(record.gps_longitudinal_offset, None);

        set_bits(&mut p, 16, 8, 17, 4, 6);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.gps_position_offset_applied, Some(false));
        assert_eq!(record.gps_longitudinal_offset, Some(10.0));
    }

    #[test]
    fn test_sv_final_byte_by_qualifier() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 17, 5, 17, 5, 1); // utc coupled
        set_bits(&mut p, 17, 6, 17, 8, 5);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.utc_coupled, Some(true));
        assert_eq!(record.uplink_feedback, Some(5));
        assert_eq!(record.tisb_site_id, None);

        // TIS-B qualifier routes the same bits to the site ID
        set_bits(&mut p, 1, 6, 1, 8, 2);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.address_qualifier, AddressQualifier::TisbIcao);
        assert_eq!(record.utc_coupled, None);
        assert_eq!(record.uplink_feedback, None);
        assert_eq!(record.tisb_site_id, Some(0b1101));
    }

    // -- Mode Status --

    fn base40_groups(chars: [u32; 8], category: u32) -> (u32, u32, u32) {
        (
            category * 1600 + chars[0] * 40 + chars[1],
            chars[2] * 1600 + chars[3] * 40 + chars[4],
            chars[5] * 1600 + chars[6] * 40 + chars[7],
        )
    }

    #[test]
    fn test_ms_callsign() {
        // "N12345  " with trailing spaces trimmed; N is base40 code 23
        let (raw1, raw2, raw3) = base40_groups([23, 1, 2, 3, 4, 5, 36, 36], 1);

        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 1); // payload type 1
        set_bits(&mut p, 18, 1, 19, 8, raw1);
        set_bits(&mut p, 20, 1, 21, 8, raw2);
        set_bits(&mut p, 22, 1, 23, 8, raw3);
        set_bits(&mut p, 27, 7, 27, 7, 1); // CSID: callsign

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.callsign.as_deref(), Some("N12345"));
        assert_eq!(record.flightplan_id, None);
        assert_eq!(record.emitter_category, Some(1));
        assert_eq!(record.to_json()["emitter_category"], "A1");
    }

    #[test]
    fn test_ms_flightplan_id_when_csid_clear() {
        // squawk 1200 as base40 digits
        let (raw1, raw2, raw3) = base40_groups([1, 2, 0, 0, 36, 36, 36, 36], 0);

        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 1);
        set_bits(&mut p, 18, 1, 19, 8, raw1);
        set_bits(&mut p, 20, 1, 21, 8, raw2);
        set_bits(&mut p, 22, 1, 23, 8, raw3);

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.flightplan_id.as_deref(), Some("1200"));
        assert_eq!(record.callsign, None);
    }

    #[test]
    fn test_ms_integrity_fields() {
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 1);
        set_bits(&mut p, 24, 1, 24, 3, 1); // general emergency
        set_bits(&mut p, 24, 4, 24, 6, 2); // MOPS version
        set_bits(&mut p, 24, 7, 24, 8, 3); // SIL
        set_bits(&mut p, 25, 1, 25, 6, 42); // transmit MSO
        set_bits(&mut p, 25, 7, 25, 8, 2); // SDA
        set_bits(&mut p, 26, 1, 26, 4, 10); // NACp
        set_bits(&mut p, 26, 5, 26, 7, 2); // NACv
        set_bits(&mut p, 26, 8, 26, 8, 1); // NICbaro
        set_bits(&mut p, 27, 1, 27, 3, 0b101); // capability codes
        set_bits(&mut p, 27, 4, 27, 6, 0b011); // operational modes
        set_bits(&mut p, 27, 8, 27, 8, 1); // SIL supplement
        set_bits(&mut p, 28, 1, 28, 2, 2); // GVA
        set_bits(&mut p, 28, 3, 28, 3, 1); // single antenna
        set_bits(&mut p, 28, 4, 28, 4, 1); // NIC supplement

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.emergency, Some(EmergencyPriorityStatus::General));
        assert_eq!(record.mops_version, Some(2));
        assert_eq!(record.sil, Some(3));
        assert_eq!(record.transmit_mso, Some(42));
        assert_eq!(record.sda, Some(2));
        assert_eq!(record.nac_p, Some(10));
        assert_eq!(record.nac_v, Some(2));
        assert_eq!(record.nic_baro, Some(1));
        assert_eq!(
            record.capability_codes,
            Some(CapabilityCodes {
                uat_in: true,
                es_in: false,
                tcas_operational: true
            })
        );
        assert_eq!(
            record.operational_modes,
            Some(OperationalModes {
                tcas_ra_active: false,
                ident_active: true,
                atc_services: true
            })
        );
        assert_eq!(record.sil_supplement, Some(SilSupplement::PerSample));
        assert_eq!(record.gva, Some(2));
        assert_eq!(record.single_antenna, Some(true));
        assert_eq!(record.nic_supplement, Some(true));

        let json = record.to_json();
        assert_eq!(json["emergency"], "general");
        assert_eq!(json["sil_supplement"], "per_sample");
        assert_eq!(json["capability_codes"]["uat_in"], true);
        assert_eq!(json["operational_modes"]["atc_services"], true);
    }

    // -- Target State --

    #[test]
    fn test_ts_at_byte_30() {
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 4); // payload type 4: SV + TS@30
        set_bits(&mut p, 30, 1, 30, 1, 0); // SAT: MCP/FCU
        set_bits(&mut p, 30, 2, 31, 4, 16000 / 32 + 1);
        set_bits(&mut p, 31, 5, 32, 5, 251); // 800 + 250*0.8 = 1000.0 mb
        set_bits(&mut p, 32, 6, 32, 6, 1); // heading valid
        set_bits(&mut p, 32, 8, 33, 7, 64); // 64 * 180 / 256 = 45 degrees
        set_bits(&mut p, 33, 8, 33, 8, 1); // mode indicators valid
        set_bits(&mut p, 34, 1, 34, 5, 0b10001); // autopilot + lnav

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.selected_altitude_type, Some(SelectedAltitudeType::McpFcu));
        assert_eq!(record.selected_altitude_mcp, Some(16000));
        assert_eq!(record.selected_altitude_fms, None);
        assert_eq!(record.barometric_pressure_setting, Some(1000.0));
        assert_eq!(record.selected_heading, Some(45.0));
        assert_eq!(
            record.mode_indicators,
            Some(ModeIndicators {
                autopilot: true,
                vnav: false,
                altitude_hold: false,
                approach: false,
                lnav: true
            })
        );

        let json = record.to_json();
        assert_eq!(json["selected_altitude_type"], "mcp_fcu");
        assert_eq!(json["mode_indicators"]["autopilot"], true);
        assert_eq!(json["mode_indicators"]["vnav"], false);
    }

    #[test]
    fn test_ts_fms_routing_and_negative_heading() {
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 4);
        set_bits(&mut p, 30, 1, 30, 1, 1); // SAT: FMS
        set_bits(&mut p, 30, 2, 31, 4, 100);
        set_bits(&mut p, 32, 6, 32, 6, 1);
        set_bits(&mut p, 32, 7, 32, 7, 1); // negative heading
        set_bits(&mut p, 32, 8, 33, 7, 128); // 90 degrees

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.selected_altitude_fms, Some(99 * 32));
        assert_eq!(record.selected_altitude_mcp, None);
        assert_eq!(record.selected_heading, Some(-90.0));
    }

    #[test]
    fn test_ts_at_byte_25_for_type_6() {
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 6); // payload type 6: SV + TS@25 + AUXSV
        set_bits(&mut p, 25, 1, 25, 1, 0);
        set_bits(&mut p, 25, 2, 26, 4, 1 + 320 / 32);

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.selected_altitude_mcp, Some(320));
    }

    // -- AUXSV --

    #[test]
    fn test_auxsv_routes_opposite_to_primary() {
        // primary barometric: AUXSV altitude is geometric
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 2); // type 2: SV + AUXSV
        set_bits(&mut p, 11, 1, 12, 4, 41 + 40); // primary 1000 ft
        set_bits(&mut p, 30, 1, 31, 4, 41 + 48); // secondary 1200 ft

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.pressure_altitude, Some(1000));
        assert_eq!(record.geometric_altitude, Some(1200));

        // primary geometric: AUXSV altitude is barometric
        set_bits(&mut p, 10, 8, 10, 8, 1);
        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.geometric_altitude, Some(1000));
        assert_eq!(record.pressure_altitude, Some(1200));
    }

    // -- composition table --

    #[test]
    fn test_type_11_and_up_decode_header_only() {
        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 11);
        set_bits(&mut p, 2, 1, 4, 8, 0x123456);
        // junk in the SV area must be ignored
        set_bits(&mut p, 5, 1, 7, 7, 12345);

        let record = AdsbRecord::decode(&long_frame(p));
        assert_eq!(record.address, 0x123456);
        assert_eq!(record.position, None);
        assert_eq!(record.nic, None);
        assert_eq!(record.airground_state, None);
    }

    #[test]
    fn test_short_frame_with_nonzero_type_stays_in_bounds() {
        // can only arrive via a crafted raw line; MS/TS/AUXSV are skipped
        let mut p = [0u8; 18];
        set_bits(&mut p, 1, 1, 1, 5, 1);
        let record = AdsbRecord::decode(&short_frame(p));
        assert_eq!(record.payload_type, 1);
        assert_eq!(record.callsign, None);
        assert_eq!(record.emergency, None);
    }

    // -- corrected frame to record --

    #[test]
    fn test_long_frame_through_fec_with_bit_error() {
        use crate::fec::FecContext;
        use crate::types::DOWNLINK_LONG_BYTES;

        let raw_lat = (37.619f64 * 16777216.0 / 360.0).round() as u32;
        let raw_lon = ((360.0 - 122.375f64) * 16777216.0 / 360.0).round() as u32;

        let mut p = [0u8; 34];
        set_bits(&mut p, 1, 1, 1, 5, 1); // payload type 1
        set_bits(&mut p, 2, 1, 4, 8, 0xA1B2C3);
        set_bits(&mut p, 5, 1, 7, 7, raw_lat);
        set_bits(&mut p, 7, 8, 10, 7, raw_lon);
        set_bits(&mut p, 12, 5, 12, 8, 9);

        let ctx = FecContext::new();
        let mut on_air = p.to_vec();
        on_air.resize(DOWNLINK_LONG_BYTES, 0);
        ctx.downlink_long().encode_block(&mut on_air);

        // one bit error in the data section, not the parity
        on_air[6] ^= 0x10;

        let (corrected, errors) = ctx.correct_downlink(&on_air, &[]).expect("correctable");
        assert_eq!(errors, 1);

        let frame = RawFrame::new(corrected, 1_000, 1, -20.0);
        let record = AdsbRecord::decode(&frame);
        assert_eq!(record.address, 0xA1B2C3);
        assert_eq!(record.errors, 1);
        let (lat, lon) = record.position.expect("position present");
        assert!((lat - 37.619).abs() < 1.5e-5);
        assert!((lon + 122.375).abs() < 1.5e-5);

        let json = record.to_json();
        assert_eq!(json["position"]["lat"], lat);
        assert_eq!(json["metadata"]["errors"], 1);
    }

    // -- JSON metadata --

    #[test]
    fn test_json_metadata() {
        let mut p = [0u8; 18];
        set_bits(&mut p, 2, 1, 4, 8, 0x00000F);
        let frame = RawFrame::with_raw_timestamp(p.to_vec(), 1609459200123, 2, -12.34, 777);

        let record = AdsbRecord::decode(&frame);
        let json = record.to_json();
        assert_eq!(json["address"], "00000f");
        assert_eq!(json["metadata"]["errors"], 2);
        assert_eq!(json["metadata"]["rssi"], -12.3);
        assert_eq!(json["metadata"]["received_at"], 1609459200.123);
        assert_eq!(json["metadata"]["raw_timestamp"], 777);
    }

    #[test]
    fn test_json_metadata_zero_timestamps_omitted() {
        let p = [0u8; 18];
        let record = AdsbRecord::decode(&short_frame(p));
        let json = record.to_json();
        assert!(json["metadata"].get("received_at").is_none());
        assert!(json["metadata"].get("raw_timestamp").is_none());
        assert_eq!(json["metadata"]["errors"], 0);
    }
}
