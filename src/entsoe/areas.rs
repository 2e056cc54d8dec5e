use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

/// ENTSO-E EIC area code
pub type AreaCode = &'static str;

/// Static reference record of a bidding zone / control area
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDescriptor {
    /// Short code used in URLs, e.g. `DE_LU`
    pub code: &'static str,
    pub name: &'static str,
    /// Transmission System Operator(s)
    pub operator: &'static str,
    /// Known publication gaps or quirks
    pub anomaly: Option<&'static str>,
    pub eic: AreaCode,
}

impl ZoneDescriptor {
    pub const fn new(
        code: &'static str,
        name: &'static str,
        operator: &'static str,
        anomaly: Option<&'static str>,
        eic: AreaCode,
    ) -> Self {
        Self {
            code,
            name,
            operator,
            anomaly,
            eic,
        }
    }
}

/// Zones offered by the dashboard, keyed by code
pub static ZONES: Lazy<HashMap<&'static str, ZoneDescriptor>> = Lazy::new(|| {
    let zones = vec![
        ZoneDescriptor::new("AT", "Austria", "APG", None, "10YAT-APG------L"),
        ZoneDescriptor::new("BE", "Belgium", "Elia", None, "10YBE----------2"),
        ZoneDescriptor::new("BG", "Bulgaria", "ESO", None, "10YCA-BULGARIA-R"),
        ZoneDescriptor::new("CH", "Switzerland", "Swissgrid", None, "10YCH-SWISSGRIDZ"),
        ZoneDescriptor::new("CZ", "Czech Republic", "CEPS", None, "10YCZ-CEPS-----N"),
        ZoneDescriptor::new(
            "DE_LU",
            "Germany-Luxembourg",
            "50Hertz, Amprion, TenneT, TransnetBW",
            Some("Prices before 2018-10-01 belong to the DE-AT-LU zone"),
            "10Y1001A1001A82H",
        ),
        ZoneDescriptor::new("DK_1", "Denmark West", "Energinet", None, "10YDK-1--------W"),
        ZoneDescriptor::new("DK_2", "Denmark East", "Energinet", None, "10YDK-2--------M"),
        ZoneDescriptor::new("EE", "Estonia", "Elering", None, "10Y1001A1001A39I"),
        ZoneDescriptor::new("ES", "Spain", "REE", None, "10YES-REE------0"),
        ZoneDescriptor::new("FI", "Finland", "Fingrid", None, "10YFI-1--------U"),
        ZoneDescriptor::new("FR", "France", "RTE", None, "10YFR-RTE------C"),
        ZoneDescriptor::new("GR", "Greece", "IPTO", None, "10YGR-HTSO-----Y"),
        ZoneDescriptor::new("HR", "Croatia", "HOPS", None, "10YHR-HEP------M"),
        ZoneDescriptor::new("HU", "Hungary", "MAVIR", None, "10YHU-MAVIR----U"),
        ZoneDescriptor::new("LT", "Lithuania", "Litgrid", None, "10YLT-1001A0008Q"),
        ZoneDescriptor::new("LV", "Latvia", "AST", None, "10YLV-1001A00074"),
        ZoneDescriptor::new(
            "MD",
            "Moldova",
            "Moldelectrica",
            Some("No day-ahead market; price queries return no data"),
            "10Y1001A1001A990",
        ),
        ZoneDescriptor::new("NL", "Netherlands", "TenneT NL", None, "10YNL----------L"),
        ZoneDescriptor::new("PL", "Poland", "PSE", None, "10YPL-AREA-----S"),
        ZoneDescriptor::new("PT", "Portugal", "REN", None, "10YPT-REN------W"),
        ZoneDescriptor::new("RO", "Romania", "Transelectrica", None, "10YRO-TEL------P"),
        ZoneDescriptor::new("SI", "Slovenia", "ELES", None, "10YSI-ELES-----O"),
        ZoneDescriptor::new("SK", "Slovakia", "SEPS", None, "10YSK-SEPS-----K"),
        ZoneDescriptor::new(
            "UA_IPS",
            "Ukraine IPS",
            "Ukrenergo",
            Some("Generation and load publication restricted since 2022-02-24"),
            "10Y1001C--00003F",
        ),
        ZoneDescriptor::new(
            "UA_BEI",
            "Ukraine Burshtyn Island",
            "Ukrenergo",
            Some("Merged into UA_IPS after the 2022 synchronisation"),
            "10YUA-WEPS-----0",
        ),
    ];

    zones.into_iter().map(|zone| (zone.code, zone)).collect()
});

/// Case-insensitive lookup by zone code
pub fn lookup(code: &str) -> Option<&'static ZoneDescriptor> {
    let code = code.to_ascii_uppercase();
    ZONES.get(code.as_str())
}

/// All zones sorted by code
pub fn list_zones() -> Vec<&'static ZoneDescriptor> {
    let mut zones: Vec<_> = ZONES.values().collect();
    zones.sort_by_key(|zone| zone.code);
    zones
}

impl std::fmt::Display for ZoneDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) - {}", self.name, self.code, self.operator)
    }
}
