//! OMRON connect account region to API server mapping.

const ASIA_PACIFIC: &[&str] = &[
    "AF", "AU", "BD", "BN", "BT", "KH", "CN", "FJ", "HK", "IN", "ID", "KR", "LA", "MY", "MN",
    "MM", "NP", "NZ", "PK", "PG", "PH", "SG", "LK", "TW", "TH", "TL", "VN",
];

const EUROPE: &[&str] = &[
    "AL", "AD", "AT", "BY", "BE", "BA", "BG", "HR", "CZ", "DK", "EE", "FI", "FR", "DE", "GR",
    "HU", "IS", "IE", "IT", "LV", "LI", "LT", "LU", "MT", "MC", "ME", "NL", "MK", "NO", "PL",
    "PT", "RO", "RU", "SM", "RS", "SK", "SI", "ES", "SE", "CH", "UA", "GB", "VA",
];

const NORTH_AMERICA: &[&str] = &[
    "CA", "MX", "US", "BZ", "CR", "SV", "GT", "HN", "NI", "PA",
];

const SOUTH_AMERICA: &[&str] = &[
    "AR", "BO", "BR", "CL", "CO", "EC", "GY", "PY", "PE", "SR", "UY", "VE",
];

const AFRICA: &[&str] = &[
    "DZ", "AO", "BJ", "BW", "BF", "BI", "CM", "CV", "CF", "TD", "KM", "CI", "CD", "DJ", "EG",
    "GQ", "ER", "ET", "GA", "GM", "GH", "GN", "GW", "KE", "LS", "LR", "LY", "MG", "MW", "ML",
    "MR", "MA", "MZ", "NA", "NE", "NG", "RW", "SN", "SC", "SL", "SO", "ZA", "SS", "SD", "SZ",
    "TZ", "TG", "TN", "UG", "ZM", "ZW",
];

const MIDDLE_EAST: &[&str] = &[
    "BH", "CY", "IR", "IQ", "IL", "JO", "KW", "LB", "OM", "PS", "QA", "SA", "SY", "TR", "AE",
    "YE",
];

const REGIONS: &[(&str, &[&str])] = &[
    ("ASIA/PACIFIC", ASIA_PACIFIC),
    ("EUROPE", EUROPE),
    ("NORTH AMERICA", NORTH_AMERICA),
    ("SOUTH AMERICA", SOUTH_AMERICA),
    ("AFRICA", AFRICA),
    ("MIDDLE EAST", MIDDLE_EAST),
];

#[must_use]
pub fn get_server_for_region(region: &str) -> Option<&'static str> {
    match region.to_uppercase().as_str() {
        "ASIA/PACIFIC" => Some("https://data-sg.omronconnect.com"),
        "EUROPE" => Some("https://oi-api.ohiomron.eu"),
        "NORTH AMERICA" => Some("https://oi-api.ohiomron.com"),
        _ => None,
    }
}

#[must_use]
pub fn get_server_for_country_code(country_code: &str) -> Option<&'static str> {
    let country_code = country_code.to_uppercase();
    if country_code == "JP" {
        return Some("https://oi-api.ohiomron.jp");
    }

    for (region, codes) in REGIONS {
        if codes.contains(&country_code.as_str()) {
            return get_server_for_region(region);
        }
    }

    None
}
