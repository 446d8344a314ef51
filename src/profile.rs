//! Power-industry register map: metering, transformer monitoring, breaker
//! status, protection settings and control commands, plus a default set of
//! generators that keep the metering values moving.

use crate::activity::WriteSource;
use crate::registry::{RegistryError, Variable, VariableRegistry};
use crate::simulation::{Generator, GeneratorKind};
use crate::store::RegisterBank;
use std::f64::consts::TAU;
use tracing::info;

/// Smallest bank size that holds every point in the map.
pub const MIN_REGISTER_COUNT: u16 = 300;

// (address, name, unit, scale, default raw, description)
type AnalogPoint = (u16, &'static str, &'static str, f64, u16, &'static str);
// (address, name, default, description)
type BinaryPoint = (u16, &'static str, u16, &'static str);

const INPUT_REGISTERS: &[AnalogPoint] = &[
    (0, "V_L1_N", "V", 0.1, 1200, "Phase L1-N Voltage"),
    (1, "V_L2_N", "V", 0.1, 1200, "Phase L2-N Voltage"),
    (2, "V_L3_N", "V", 0.1, 1200, "Phase L3-N Voltage"),
    (3, "V_L1_L2", "V", 0.1, 2078, "Phase L1-L2 Voltage"),
    (4, "V_L2_L3", "V", 0.1, 2078, "Phase L2-L3 Voltage"),
    (5, "V_L3_L1", "V", 0.1, 2078, "Phase L3-L1 Voltage"),
    (6, "V_AVG_LN", "V", 0.1, 1200, "Average L-N Voltage"),
    (7, "V_AVG_LL", "V", 0.1, 2078, "Average L-L Voltage"),
    (8, "V_UNBAL", "%", 0.01, 50, "Voltage Unbalance"),
    (20, "I_L1", "A", 0.01, 10000, "Phase L1 Current"),
    (21, "I_L2", "A", 0.01, 10000, "Phase L2 Current"),
    (22, "I_L3", "A", 0.01, 10000, "Phase L3 Current"),
    (23, "I_N", "A", 0.01, 100, "Neutral Current"),
    (24, "I_G", "A", 0.01, 0, "Ground Current"),
    (25, "I_AVG", "A", 0.01, 10000, "Average Phase Current"),
    (40, "P_L1", "kW", 0.1, 400, "Phase L1 Active Power"),
    (41, "P_L2", "kW", 0.1, 400, "Phase L2 Active Power"),
    (42, "P_L3", "kW", 0.1, 400, "Phase L3 Active Power"),
    (43, "P_TOTAL", "kW", 0.1, 1200, "Total Active Power"),
    (47, "Q_TOTAL", "kVAR", 0.1, 300, "Total Reactive Power"),
    (51, "S_TOTAL", "kVA", 0.1, 1237, "Total Apparent Power"),
    (55, "PF_TOTAL", "", 0.001, 970, "Total Power Factor"),
    (70, "FREQ", "Hz", 0.01, 6000, "System Frequency"),
    (71, "FREQ_DEV", "Hz", 0.001, 0, "Frequency Deviation"),
    (100, "XFMR_OIL_TEMP", "°C", 0.1, 450, "Transformer Oil Temperature"),
    (101, "XFMR_WNDG_TEMP", "°C", 0.1, 550, "Transformer Winding Temperature"),
    (102, "XFMR_AMB_TEMP", "°C", 0.1, 250, "Ambient Temperature"),
    (103, "XFMR_LOAD_PCT", "%", 0.1, 650, "Transformer Load Percent"),
    (104, "XFMR_OIL_LEVEL", "%", 0.1, 950, "Oil Level"),
    (106, "XFMR_TAP_POS", "", 1.0, 8, "Tap Changer Position"),
    (108, "XFMR_H2_PPM", "ppm", 1.0, 25, "Dissolved H2 Gas"),
    (130, "BKR_OPS_TOTAL", "", 1.0, 1250, "Total Breaker Operations"),
    (131, "BKR_FAULT_OPS", "", 1.0, 45, "Fault Operations Count"),
    (132, "BKR_CLOSE_TIME", "ms", 0.1, 650, "Last Close Time"),
    (133, "BKR_TRIP_TIME", "ms", 0.1, 480, "Last Trip Time"),
    (136, "BKR_SF6_PRESS", "bar", 0.01, 650, "SF6 Gas Pressure"),
    (159, "PROT_LAST_FAULT_I", "A", 0.01, 0, "Last Fault Current"),
    (180, "GEN_MW", "MW", 0.1, 750, "Generator MW Output"),
    (181, "GEN_MVAR", "MVAR", 0.1, 200, "Generator MVAR Output"),
    (184, "GEN_SPEED_RPM", "RPM", 1.0, 3600, "Generator Speed"),
    (214, "CAP_STEPS_ON", "", 1.0, 3, "Capacitor Steps Energized"),
    (230, "DC_BUS_V", "V", 0.1, 1250, "DC Bus Voltage"),
    (235, "DC_BATT_SOC", "%", 0.1, 950, "Battery State of Charge"),
    (250, "ENV_TEMP_OUT", "°C", 0.1, 220, "Outdoor Temperature"),
    (270, "LINE_LOADING", "%", 0.1, 720, "Line Loading Percent"),
    (290, "DEMAND_KW_MAX", "kW", 0.1, 1500, "Maximum kW Demand"),
];

// Energy counters span two registers, high word first. Defaults fit the low word.
const ENERGY_COUNTERS: &[AnalogPoint] = &[
    (80, "WH_IMP", "kWh", 1.0, 12500, "Imported Energy"),
    (82, "WH_EXP", "kWh", 1.0, 500, "Exported Energy"),
    (84, "VARH_IMP", "kVARh", 1.0, 3200, "Imported Reactive Energy"),
    (86, "VARH_EXP", "kVARh", 1.0, 100, "Exported Reactive Energy"),
    (88, "VAH", "kVAh", 1.0, 13000, "Total Apparent Energy"),
];

const HOLDING_REGISTERS: &[AnalogPoint] = &[
    (0, "SP_V_TARGET", "V", 0.1, 1200, "Voltage Setpoint"),
    (1, "SP_PF_TARGET", "", 0.001, 950, "Power Factor Setpoint"),
    (2, "SP_MW_TARGET", "MW", 0.1, 750, "MW Setpoint"),
    (4, "SP_FREQ_TARGET", "Hz", 0.01, 6000, "Frequency Setpoint"),
    (5, "SP_TAP_TARGET", "", 1.0, 8, "Tap Position Setpoint"),
    (50, "SET_50_PICKUP", "A", 0.01, 50000, "50 Inst OC Pickup"),
    (51, "SET_51_PICKUP", "A", 0.01, 12000, "51 TOC Pickup"),
    (52, "SET_51_TD", "", 0.01, 300, "51 Time Dial"),
    (57, "SET_27_PICKUP", "V", 0.1, 900, "27 UV Pickup"),
    (59, "SET_59_PICKUP", "V", 0.1, 1320, "59 OV Pickup"),
    (61, "SET_81U_PICKUP", "Hz", 0.01, 5950, "81U UF Pickup"),
    (63, "SET_81O_PICKUP", "Hz", 0.01, 6050, "81O OF Pickup"),
    (100, "XFMR_TAP_MODE", "", 1.0, 1, "Tap Changer Mode (0=Man/1=Auto)"),
    (104, "XFMR_FAN_STAGE1", "°C", 0.1, 550, "Fan Stage 1 Temp"),
    (105, "XFMR_FAN_STAGE2", "°C", 0.1, 650, "Fan Stage 2 Temp"),
    (120, "CAP_MODE", "", 1.0, 1, "Cap Bank Mode (0=Man/1=Auto)"),
    (141, "GEN_MW_SP", "MW", 0.1, 750, "Generator MW Setpoint"),
    (160, "ALM_V_HI", "V", 0.1, 1260, "High Voltage Alarm"),
    (161, "ALM_V_LO", "V", 0.1, 1140, "Low Voltage Alarm"),
    (164, "ALM_I_HI", "A", 0.01, 11000, "High Current Alarm"),
    (166, "ALM_FREQ_HI", "Hz", 0.01, 6030, "High Frequency Alarm"),
    (167, "ALM_FREQ_LO", "Hz", 0.01, 5970, "Low Frequency Alarm"),
    (168, "ALM_TEMP_HI", "°C", 0.1, 750, "High Temperature Alarm"),
    (170, "ALM_PF_LO", "", 0.001, 850, "Low Power Factor Alarm"),
];

const DISCRETE_INPUTS: &[BinaryPoint] = &[
    (0, "BKR_52A", 1, "Breaker 52A Status (Closed)"),
    (1, "BKR_52B", 0, "Breaker 52B Status (Open)"),
    (2, "BKR_READY", 1, "Breaker Ready"),
    (3, "BKR_SPRING_CHARGED", 1, "Spring Charged"),
    (4, "BKR_LOCKOUT", 0, "Breaker Lockout"),
    (6, "BKR_REMOTE", 1, "Remote Control Mode"),
    (9, "BKR_SF6_ALARM", 0, "SF6 Low Pressure Alarm"),
    (30, "PROT_ENABLED", 1, "Protection Enabled"),
    (31, "PROT_50_PU", 0, "50 Element Pickup"),
    (32, "PROT_51_PU", 0, "51 Element Pickup"),
    (42, "PROT_50_TRIP", 0, "50 Element Trip"),
    (43, "PROT_51_TRIP", 0, "51 Element Trip"),
    (51, "PROT_RECL_ENABLED", 1, "Recloser Enabled"),
    (60, "XFMR_ONLINE", 1, "Transformer Online"),
    (61, "XFMR_OIL_TEMP_ALM", 0, "Oil Temperature Alarm"),
    (66, "XFMR_BUCHHOLZ_ALM", 0, "Buchholz Alarm"),
    (68, "XFMR_FAN1_RUN", 1, "Cooling Fan 1 Running"),
    (80, "GEN_ONLINE", 1, "Generator Online"),
    (81, "GEN_SYNC_CHECK", 1, "Sync Check OK"),
    (120, "DC_CHARGER_ON", 1, "Charger On"),
    (140, "COMM_SCADA_OK", 1, "SCADA Comm OK"),
    (142, "COMM_GPS_SYNC", 1, "GPS Time Sync OK"),
    (150, "ALM_ANY_ACTIVE", 0, "Any Alarm Active"),
];

const COILS: &[BinaryPoint] = &[
    (0, "CMD_BKR_CLOSE", 0, "Breaker Close Command"),
    (1, "CMD_BKR_TRIP", 0, "Breaker Trip Command"),
    (2, "CMD_BKR_RESET", 0, "Breaker Reset Command"),
    (3, "CMD_LOCKOUT_RESET", 0, "Lockout Reset Command"),
    (20, "CMD_PROT_ENABLE", 0, "Enable Protection"),
    (21, "CMD_PROT_DISABLE", 0, "Disable Protection"),
    (22, "CMD_RECL_ENABLE", 0, "Enable Recloser"),
    (25, "CMD_TARGETS_RESET", 0, "Reset Target LEDs"),
    (27, "CMD_DEMAND_RESET", 0, "Reset Demand Values"),
    (40, "CMD_TAP_RAISE", 0, "Tap Changer Raise"),
    (41, "CMD_TAP_LOWER", 0, "Tap Changer Lower"),
    (44, "CMD_FAN1_START", 0, "Start Fan 1"),
    (45, "CMD_FAN1_STOP", 0, "Stop Fan 1"),
];

/// A profile point: its variable definition and default raw cells.
#[derive(Debug, Clone)]
pub struct ProfilePoint {
    pub variable: Variable,
    pub default_cells: Vec<u16>,
}

fn analog(bank: RegisterBank, point: &AnalogPoint) -> ProfilePoint {
    let (address, name, unit, scale, default, description) = *point;
    ProfilePoint {
        variable: Variable::new(name, bank, address, scale, unit).describe(description),
        default_cells: vec![default],
    }
}

fn binary(bank: RegisterBank, point: &BinaryPoint) -> ProfilePoint {
    let (address, name, default, description) = *point;
    ProfilePoint {
        variable: Variable::new(name, bank, address, 1.0, "").describe(description),
        default_cells: vec![default],
    }
}

/// Every point of the map, in bank order.
pub fn points() -> Vec<ProfilePoint> {
    let mut points = Vec::new();
    points.extend(COILS.iter().map(|p| binary(RegisterBank::Coil, p)));
    points.extend(DISCRETE_INPUTS.iter().map(|p| binary(RegisterBank::DiscreteInput, p)));
    points.extend(HOLDING_REGISTERS.iter().map(|p| analog(RegisterBank::HoldingRegister, p)));
    points.extend(INPUT_REGISTERS.iter().map(|p| analog(RegisterBank::InputRegister, p)));
    points.extend(ENERGY_COUNTERS.iter().map(|p| {
        let mut point = analog(RegisterBank::InputRegister, p);
        point.variable = point.variable.wide();
        point.default_cells = vec![0, p.4];
        point
    }));
    points
}

/// Define every profile variable and write its default value.
/// Returns the number of variables defined.
pub fn install(registry: &VariableRegistry) -> Result<usize, RegistryError> {
    let points = points();
    for point in &points {
        registry.define(point.variable.clone())?;
    }
    write_defaults(registry, &points)?;
    info!("📋 Installed power profile: {} variables", points.len());
    Ok(points.len())
}

/// Rewrite every profile default. Profile variables that were removed are
/// defined again; variables added by the operator are left alone.
pub fn reset_defaults(registry: &VariableRegistry) -> Result<usize, RegistryError> {
    let points = points();
    let mut restored = 0;
    for point in &points {
        if !registry.contains(&point.variable.name) {
            registry.define(point.variable.clone())?;
            restored += 1;
        }
    }
    write_defaults(registry, &points)?;
    info!("🔄 Reset {} profile points to defaults ({} redefined)", points.len(), restored);
    Ok(points.len())
}

fn write_defaults(registry: &VariableRegistry, points: &[ProfilePoint]) -> Result<(), RegistryError> {
    let store = registry.store();
    for point in points {
        let variable = &point.variable;
        store.write_many(
            variable.bank,
            variable.address,
            &point.default_cells,
            WriteSource::ExternalApi,
        )?;
    }
    Ok(())
}

/// Generators animating the metering points.
pub fn default_generators() -> Vec<Generator> {
    let phase_voltage = |name: &str, phase: f64| {
        Generator::new(
            &format!("{}_wave", name.to_lowercase()),
            name,
            GeneratorKind::Sine { amplitude: 2.0, offset: 120.0, period_s: 60.0, phase },
        )
    };

    vec![
        phase_voltage("V_L1_N", 0.0),
        phase_voltage("V_L2_N", TAU / 3.0),
        phase_voltage("V_L3_N", 2.0 * TAU / 3.0),
        Generator::new(
            "i_l1_wave",
            "I_L1",
            GeneratorKind::Sine { amplitude: 5.0, offset: 100.0, period_s: 120.0, phase: 0.0 },
        ),
        Generator::new(
            "freq_drift",
            "FREQ",
            GeneratorKind::RandomWalk { min: 59.95, max: 60.05, max_step: 0.01, seed: 60 },
        ),
        Generator::new(
            "load_ramp",
            "P_TOTAL",
            GeneratorKind::Ramp { min: 100.0, max: 150.0, step: 2.5 },
        ),
        Generator::new(
            "oil_temp_cycle",
            "XFMR_OIL_TEMP",
            GeneratorKind::Sine { amplitude: 5.0, offset: 45.0, period_s: 600.0, phase: 0.0 },
        ),
        Generator::new(
            "gen_output",
            "GEN_MW",
            GeneratorKind::RandomWalk { min: 70.0, max: 80.0, max_step: 0.5, seed: 7 },
        ),
        Generator::new(
            "cap_switching",
            "CAP_STEPS_ON",
            GeneratorKind::Square { high: 4.0, low: 3.0, period_s: 300.0, duty_cycle: 0.5 },
        )
        .disabled(),
    ]
}
