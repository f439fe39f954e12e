//! Tick domains and converter factor computation

use crate::error::{Result, RouteError};
use crate::graph::Direction;
use crate::hw::regs::{AsrcField, OS_DEFAULT_MAX};
use crate::hw::WriteBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default nominal factor for asynchronous operation
pub const DEFAULT_FACTOR: u32 = 36864;

/// Clock source driving one side of a converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TickSource {
    /// Another processor's clock
    Cp,
    /// Shared system tick
    Sync,
    /// Physical interface bit clock
    Uaif(u8),
    Usb,
}

impl TickSource {
    /// Source select code
    pub fn code(&self) -> u32 {
        match self {
            TickSource::Cp => 0,
            TickSource::Sync => 1,
            TickSource::Uaif(n) => 3 + *n as u32,
            TickSource::Usb => 7,
        }
    }

    pub fn is_external(&self) -> bool {
        *self != TickSource::Sync
    }
}

impl std::fmt::Display for TickSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickSource::Cp => write!(f, "cp"),
            TickSource::Sync => write!(f, "sync"),
            TickSource::Uaif(n) => write!(f, "uaif{}", n),
            TickSource::Usb => write!(f, "usb"),
        }
    }
}

impl std::str::FromStr for TickSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cp" => Ok(TickSource::Cp),
            "sync" => Ok(TickSource::Sync),
            "usb" => Ok(TickSource::Usb),
            other => match other.strip_prefix("uaif").map(str::parse::<u8>) {
                Some(Ok(n)) if n < 4 => Ok(TickSource::Uaif(n)),
                _ => Err(format!("unknown tick source '{}'", s)),
            },
        }
    }
}

impl TryFrom<String> for TickSource {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TickSource> for String {
    fn from(t: TickSource) -> Self {
        t.to_string()
    }
}

/// Power-of-two oversample / decimate ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ratio {
    X1,
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
    X128,
    X256,
}

impl Ratio {
    /// Register encoding, also the shift amount
    pub fn shift(&self) -> u32 {
        *self as u32
    }

    pub fn multiplier(&self) -> u32 {
        1 << self.shift()
    }

    /// Next ratio down, `None` at ×1
    pub fn lower(&self) -> Option<Ratio> {
        use Ratio::*;
        match self {
            X1 => None,
            X2 => Some(X1),
            X4 => Some(X2),
            X8 => Some(X4),
            X16 => Some(X8),
            X32 => Some(X16),
            X64 => Some(X32),
            X128 => Some(X64),
            X256 => Some(X128),
        }
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.multiplier())
    }
}

/// Coarse sample rate class used to index the synchronous table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateClass {
    R8000,
    R16000,
    R32000,
    R40000,
    R44100,
    R48000,
    R96000,
    R192000,
    R384000,
}

impl RateClass {
    pub const ALL: [RateClass; 9] = [
        RateClass::R8000,
        RateClass::R16000,
        RateClass::R32000,
        RateClass::R40000,
        RateClass::R44100,
        RateClass::R48000,
        RateClass::R96000,
        RateClass::R192000,
        RateClass::R384000,
    ];

    /// Class of an exact rate; anything else is treated as 48 kHz
    pub fn from_rate(rate: u32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.hz() == rate)
            .unwrap_or_else(|| {
                debug!("rate {}Hz has no class, using 48000Hz", rate);
                RateClass::R48000
            })
    }

    pub fn hz(&self) -> u32 {
        match self {
            RateClass::R8000 => 8000,
            RateClass::R16000 => 16000,
            RateClass::R32000 => 32000,
            RateClass::R40000 => 40000,
            RateClass::R44100 => 44100,
            RateClass::R48000 => 48000,
            RateClass::R96000 => 96000,
            RateClass::R192000 => 192000,
            RateClass::R384000 => 384000,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Synchronous table entry: oversample ratio, input factor, decimate ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEntry {
    pub ovsf: Ratio,
    pub ifactor: u32,
    pub dcmf: Ratio,
}

const fn e(ovsf: Ratio, ifactor: u32, dcmf: Ratio) -> SyncEntry {
    SyncEntry {
        ovsf,
        ifactor,
        dcmf,
    }
}

use Ratio::{X1, X2, X4, X8};

/// Synchronous-mode parameters indexed by [input class][output class]
#[rustfmt::skip]
pub const SYNC_TABLE: [[SyncEntry; 9]; 9] = [
    // 8000
    [e(X8, 65536, X8), e(X8, 65536, X8), e(X8, 98304, X8), e(X8, 76800, X8), e(X8, 88200, X8),
     e(X8, 98304, X8), e(X8, 98304, X4), e(X8, 98304, X2), e(X8, 98304, X1)],
    // 16000
    [e(X8, 32768, X8), e(X8, 65536, X8), e(X8, 65536, X8), e(X8, 76800, X8), e(X8, 88200, X8),
     e(X8, 98304, X8), e(X8, 98304, X8), e(X8, 98304, X4), e(X8, 98304, X2)],
    // 32000
    [e(X8, 24576, X8), e(X8, 32768, X8), e(X8, 65536, X8), e(X8, 76800, X8), e(X8, 88200, X8),
     e(X8, 98304, X8), e(X8, 73728, X2), e(X8, 98304, X2), e(X8, 98304, X1)],
    // 40000
    [e(X8, 15360, X8), e(X8, 30720, X8), e(X8, 61440, X8), e(X8, 65536, X8), e(X8, 88200, X8),
     e(X8, 61440, X8), e(X8, 61440, X4), e(X8, 61440, X2), e(X8, 61440, X1)],
    // 44100
    [e(X8, 20480, X8), e(X8, 40960, X8), e(X8, 61440, X8), e(X8, 80000, X8), e(X8, 61440, X8),
     e(X8, 61440, X8), e(X8, 61440, X2), e(X8, 61440, X2), e(X8, 61440, X1)],
    // 48000
    [e(X8, 16384, X8), e(X8, 32768, X8), e(X8, 65536, X8), e(X8, 51200, X8), e(X8, 88200, X8),
     e(X8, 98304, X8), e(X8, 32768, X2), e(X8, 65536, X2), e(X8, 65536, X1)],
    // 96000
    [e(X2, 32768, X8), e(X2, 65536, X8), e(X2, 98304, X8), e(X4, 51200, X8), e(X4, 88200, X8),
     e(X4, 65536, X8), e(X4, 98304, X8), e(X4, 98304, X4), e(X4, 98304, X2)],
    // 192000
    [e(X2, 16384, X8), e(X2, 32768, X8), e(X2, 32768, X8), e(X2, 51200, X8), e(X4, 44100, X8),
     e(X2, 98304, X8), e(X1, 98304, X2), e(X1, 98304, X1), e(X2, 98304, X1)],
    // 384000
    [e(X1, 16384, X8), e(X1, 32768, X8), e(X1, 32768, X8), e(X1, 51200, X8), e(X1, 56448, X8),
     e(X1, 32768, X4), e(X1, 65536, X4), e(X1, 98304, X2), e(X1, 98304, X1)],
];

/// Complementary factor for an input factor and rate pair
///
/// `ifactor * (isr/100 << ovsf) / (osr/100 << dcmf)`
pub fn output_factor(ifactor: u32, isr: u32, ovsf: Ratio, osr: u32, dcmf: Ratio) -> u64 {
    let num = ifactor as u64 * (((isr / 100) as u64) << ovsf.shift());
    let den = ((osr / 100) as u64) << dcmf.shift();
    if den == 0 {
        return u64::MAX;
    }
    num / den
}

/// T-period limit, 5% of the factor
pub fn tperiod_limit(factor: u32) -> u32 {
    factor / 20
}

/// Bus clock to tick divider: (bus clock, ticknum, tickdiv)
const BUS_TICK_TABLE: [(u64, u32, u32); 6] = [
    (600_000_000, 1, 1),
    (400_000_000, 3, 2),
    (300_000_000, 2, 1),
    (200_000_000, 3, 1),
    (150_000_000, 4, 1),
    (100_000_000, 6, 1),
];

/// Tick numerator and divider programmed for externally clocked units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTick {
    pub num: u32,
    pub div: u32,
}

impl BusTick {
    /// Pick the divider for a bus clock; the last table row not below the
    /// clock wins
    pub fn for_bus_clock(hz: u64) -> Self {
        let mut tick = BusTick { num: 1, div: 1 };
        for &(aclk, num, div) in BUS_TICK_TABLE.iter() {
            if hz > aclk {
                break;
            }
            tick = BusTick { num, div };
        }
        tick
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Synchronous,
    Asynchronous,
}

/// Everything programmed into one converter unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    pub mode: TickMode,
    pub input: TickSource,
    pub output: TickSource,
    pub in_rate: u32,
    pub out_rate: u32,
    pub ovsf: Ratio,
    pub dcmf: Ratio,
    pub ifactor: u32,
    pub ofactor: u32,
    pub is_limit: u32,
    pub os_limit: u32,
    pub out_width: u32,
    pub apf_coef: u32,
    /// Divider for units with an external side
    pub bus_tick: Option<BusTick>,
}

impl TickConfig {
    /// Queue this configuration for a unit
    pub fn queue_writes(&self, direction: Direction, unit: u8, batch: &mut WriteBatch) {
        let f = |field: AsrcField| field.of(direction, unit);
        batch
            .set("out width", f(AsrcField::OutBitWidth), (self.out_width / 8).saturating_sub(1))
            .set("is sync", f(AsrcField::IsAsync), self.input.is_external() as u32)
            .set("os sync", f(AsrcField::OsAsync), self.output.is_external() as u32)
            .set("ovsf ratio", f(AsrcField::OvsfRatio), self.ovsf.shift())
            .set("dcmf ratio", f(AsrcField::DcmfRatio), self.dcmf.shift())
            .set("is source", f(AsrcField::IsSource), self.input.code())
            .set("os source", f(AsrcField::OsSource), self.output.code())
            .set("is default", f(AsrcField::IsDefault), self.ifactor)
            .set("is tperiod limit", f(AsrcField::IsTperiodLimit), self.is_limit)
            .set("os default", f(AsrcField::OsDefault), self.ofactor)
            .set("os tperiod limit", f(AsrcField::OsTperiodLimit), self.os_limit)
            .set("apf coef sel", f(AsrcField::ApfCoef), self.apf_coef);

        if let Some(tick) = self.bus_tick {
            queue_bus_tick(direction, unit, tick, batch);
        }
    }
}

/// Queue the tick divider fields for a unit
pub fn queue_bus_tick(direction: Direction, unit: u8, tick: BusTick, batch: &mut WriteBatch) {
    batch
        .set("ticknum", AsrcField::TickNum.of(direction, unit), tick.num)
        .set("tickdiv", AsrcField::TickDiv.of(direction, unit), tick.div);
}

/// Chooses synchronous or asynchronous operation and computes factors
#[derive(Debug, Clone)]
pub struct TickRouter {
    default_factor: u32,
    bus_clock_hz: u64,
    factor_max: u32,
}

impl TickRouter {
    pub fn new(default_factor: u32, bus_clock_hz: u64) -> Self {
        Self {
            default_factor,
            bus_clock_hz,
            factor_max: OS_DEFAULT_MAX,
        }
    }

    pub fn default_factor(&self) -> u32 {
        self.default_factor
    }

    pub fn bus_clock_hz(&self) -> u64 {
        self.bus_clock_hz
    }

    pub fn set_bus_clock_hz(&mut self, hz: u64) {
        self.bus_clock_hz = hz;
    }

    pub fn bus_tick(&self) -> BusTick {
        BusTick::for_bus_clock(self.bus_clock_hz)
    }

    /// Compute the unit configuration for a side pair
    pub fn compute(
        &self,
        input: TickSource,
        in_rate: u32,
        output: TickSource,
        out_rate: u32,
        out_width: u32,
        apf_coef: u32,
    ) -> Result<TickConfig> {
        let cfg = match (input.is_external(), output.is_external()) {
            (false, false) => self.synchronous(in_rate, out_rate),
            (true, false) | (false, true) => self.asynchronous(input, in_rate, out_rate)?,
            (true, true) => {
                return Err(RouteError::InvalidTickConfiguration {
                    input: input.to_string(),
                    output: output.to_string(),
                })
            }
        };

        let (ovsf, ifactor, dcmf, ofactor) = cfg;
        let mode = if input.is_external() || output.is_external() {
            TickMode::Asynchronous
        } else {
            TickMode::Synchronous
        };

        let config = TickConfig {
            mode,
            input,
            output,
            in_rate,
            out_rate,
            ovsf,
            dcmf,
            ifactor,
            ofactor,
            is_limit: tperiod_limit(ifactor),
            os_limit: tperiod_limit(ofactor),
            out_width,
            apf_coef,
            bus_tick: (mode == TickMode::Asynchronous).then(|| self.bus_tick()),
        };

        info!(
            "asrc {:?}: {}/{}Hz -> {}/{}Hz, ovsf {}, dcmf {}, factors {}/{}",
            mode, input, in_rate, output, out_rate, ovsf, dcmf, ifactor, ofactor
        );
        Ok(config)
    }

    /// Factors come from the table row, so a rate outside every class is
    /// computed as its fallback class
    fn synchronous(&self, in_rate: u32, out_rate: u32) -> (Ratio, u32, Ratio, u32) {
        let (isr, osr) = (RateClass::from_rate(in_rate), RateClass::from_rate(out_rate));
        let entry = SYNC_TABLE[isr.index()][osr.index()];
        let ofactor = output_factor(entry.ifactor, isr.hz(), entry.ovsf, osr.hz(), entry.dcmf);
        (
            entry.ovsf,
            entry.ifactor,
            entry.dcmf,
            ofactor.min(self.factor_max as u64) as u32,
        )
    }

    /// The external side is treated as the input while searching, then
    /// swapped back if the external side is really the output.
    fn asynchronous(
        &self,
        input: TickSource,
        in_rate: u32,
        out_rate: u32,
    ) -> Result<(Ratio, u32, Ratio, u32)> {
        if self.default_factor == 0 {
            return Err(RouteError::InvalidConfig("default factor is zero".into()));
        }

        let input_external = input.is_external();
        let (isr, osr) = if input_external {
            (in_rate, out_rate)
        } else {
            (out_rate, in_rate)
        };

        let dcmf = Ratio::X8;
        let mut ovsf = Ratio::X8;
        let mut ofactor = output_factor(self.default_factor, isr, ovsf, osr, dcmf);
        while ofactor > self.factor_max as u64 {
            ovsf = ovsf
                .lower()
                .ok_or(RouteError::TickFactorOverflow { factor: ofactor })?;
            ofactor = output_factor(self.default_factor, isr, ovsf, osr, dcmf);
        }
        let ofactor = ofactor as u32;

        if input_external {
            Ok((ovsf, self.default_factor, dcmf, ofactor))
        } else {
            Ok((dcmf, ofactor, ovsf, self.default_factor))
        }
    }
}

impl Default for TickRouter {
    fn default() -> Self {
        Self::new(DEFAULT_FACTOR, 400_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_48k_to_96k_uses_table() {
        let router = TickRouter::default();
        let cfg = router
            .compute(TickSource::Sync, 48000, TickSource::Sync, 96000, 24, 0)
            .unwrap();
        assert_eq!(cfg.mode, TickMode::Synchronous);
        assert_eq!(cfg.ovsf, Ratio::X8);
        assert_eq!(cfg.ifactor, 32768);
        assert_eq!(cfg.dcmf, Ratio::X2);
        // 32768 * (480 << 3) / (960 << 1)
        assert_eq!(cfg.ofactor, 65536);
        assert_eq!(cfg.is_limit, 32768 / 20);
        assert_eq!(cfg.bus_tick, None);

        // Deterministic across calls
        let again = router
            .compute(TickSource::Sync, 48000, TickSource::Sync, 96000, 24, 0)
            .unwrap();
        assert_eq!(cfg, again);
    }

    #[test]
    fn test_unknown_rate_maps_to_48k() {
        assert_eq!(RateClass::from_rate(11025), RateClass::R48000);
        assert_eq!(RateClass::from_rate(44100), RateClass::R44100);
    }

    #[test]
    fn test_sync_unknown_rate_uses_class_factors() {
        let cfg = TickRouter::default()
            .compute(TickSource::Sync, 11025, TickSource::Sync, 48000, 16, 0)
            .unwrap();
        let entry = SYNC_TABLE[RateClass::R48000.index()][RateClass::R48000.index()];
        assert_eq!(cfg.ifactor, entry.ifactor);
        // 48k -> 48k at equal ratios keeps the factor
        assert_eq!(cfg.ofactor, 98304);
        assert_eq!(cfg.ofactor, cfg.ifactor);
        assert_eq!(cfg.in_rate, 11025);
    }

    #[test]
    fn test_async_lowers_oversample_until_fit() {
        let router = TickRouter::default();
        let cfg = router
            .compute(TickSource::Cp, 96000, TickSource::Sync, 8000, 16, 0)
            .unwrap();
        assert_eq!(cfg.mode, TickMode::Asynchronous);
        // x8 gives 442368, over the 18-bit field
        assert_eq!(cfg.ovsf, Ratio::X4);
        assert_eq!(cfg.ifactor, DEFAULT_FACTOR);
        assert_eq!(cfg.ofactor, 221184);
        assert!(cfg.ofactor <= OS_DEFAULT_MAX);
        assert_eq!(cfg.bus_tick, Some(BusTick { num: 3, div: 2 }));
    }

    #[test]
    fn test_async_output_side_swaps_back() {
        let router = TickRouter::default();
        let cfg = router
            .compute(TickSource::Sync, 8000, TickSource::Uaif(1), 96000, 16, 0)
            .unwrap();
        // Search ran with the external side as input, then swapped
        assert_eq!(cfg.dcmf, Ratio::X4);
        assert_eq!(cfg.ovsf, Ratio::X8);
        assert_eq!(cfg.ifactor, 221184);
        assert_eq!(cfg.ofactor, DEFAULT_FACTOR);
    }

    #[test]
    fn test_async_overflow_at_lowest_ratio() {
        let router = TickRouter::new(0x3FFFF, 400_000_000);
        let err = router
            .compute(TickSource::Cp, 384000, TickSource::Sync, 8000, 16, 0)
            .unwrap_err();
        assert!(matches!(err, RouteError::TickFactorOverflow { .. }));
    }

    #[test]
    fn test_invalid_tick_pairs() {
        let router = TickRouter::default();
        let err = router
            .compute(TickSource::Cp, 48000, TickSource::Usb, 48000, 16, 0)
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::InvalidTickConfiguration {
                input: "cp".into(),
                output: "usb".into()
            }
        );

        let zero = TickRouter::new(0, 400_000_000);
        assert!(zero
            .compute(TickSource::Cp, 48000, TickSource::Sync, 48000, 16, 0)
            .is_err());
    }

    #[test]
    fn test_bus_tick_table() {
        assert_eq!(BusTick::for_bus_clock(600_000_000), BusTick { num: 1, div: 1 });
        assert_eq!(BusTick::for_bus_clock(400_000_000), BusTick { num: 3, div: 2 });
        assert_eq!(BusTick::for_bus_clock(250_000_000), BusTick { num: 2, div: 1 });
        assert_eq!(BusTick::for_bus_clock(100_000_000), BusTick { num: 6, div: 1 });
        assert_eq!(BusTick::for_bus_clock(50_000_000), BusTick { num: 6, div: 1 });
        assert_eq!(BusTick::for_bus_clock(800_000_000), BusTick { num: 1, div: 1 });
    }

    #[test]
    fn test_tick_source_parse() {
        assert_eq!("uaif2".parse::<TickSource>(), Ok(TickSource::Uaif(2)));
        assert_eq!("SYNC".parse::<TickSource>(), Ok(TickSource::Sync));
        assert!("uaif9".parse::<TickSource>().is_err());
        assert_eq!(TickSource::Uaif(0).code(), 3);
        assert_eq!(TickSource::Usb.code(), 7);
    }
}
