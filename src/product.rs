//! Product table
//!
//! Constant table keyed by product identifier. Each product owns a disjoint
//! error code range and a default naming convention for its outputs, so no
//! central registry is needed at runtime.

/// Default naming rule shipped with a product
#[derive(Debug, Clone, Copy)]
pub struct DefaultRule {
    pub pattern: &'static str,
    pub label: &'static str,
    pub required: bool,
}

const fn rule(pattern: &'static str, label: &'static str) -> DefaultRule {
    DefaultRule {
        pattern,
        label,
        required: false,
    }
}

const fn required(pattern: &'static str, label: &'static str) -> DefaultRule {
    DefaultRule {
        pattern,
        label,
        required: true,
    }
}

/// Static description of one product
#[derive(Debug, Clone, Copy)]
pub struct ProductSpec {
    /// Identifier used in `PrimaryExecutable.ProductIdentifier`
    pub identifier: &'static str,
    /// Lowercase name used in QA file names
    pub short_name: &'static str,
    /// Prefix of canonical output file names
    pub file_prefix: &'static str,
    pub error_code_base: i64,
    /// Ordered; first match wins
    pub naming_rules: &'static [DefaultRule],
}

pub const PRODUCTS: &[ProductSpec] = &[
    ProductSpec {
        identifier: "DSWX_HLS",
        short_name: "dswx_hls",
        file_prefix: "OPERA_L3_DSWx-HLS",
        error_code_base: 100000,
        naming_rules: &[
            required(r"_B01_WTR\.tif$", "B01_WTR"),
            rule(r"_B02_BWTR\.tif$", "B02_BWTR"),
            rule(r"_B03_CONF\.tif$", "B03_CONF"),
            rule(r"_B04_DIAG\.tif$", "B04_DIAG"),
            rule(r"_WTR-1\.tif$", "B05_WTR-1"),
            rule(r"_WTR-2\.tif$", "B06_WTR-2"),
            rule(r"_BROWSE\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "CSLC_S1",
        short_name: "cslc_s1",
        file_prefix: "OPERA_L2_CSLC-S1",
        error_code_base: 200000,
        naming_rules: &[
            // static layers must be tried before the generic burst product
            rule(
                r"(?P<burst_id>t\d{3}_\d{6}_iw\d)_static_layers\.h5$",
                "${burst_id}_Static",
            ),
            rule(r"(?P<burst_id>t\d{3}_\d{6}_iw\d).*\.h5$", "${burst_id}"),
            rule(r"\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "RTC_S1",
        short_name: "rtc_s1",
        file_prefix: "OPERA_L2_RTC-S1",
        error_code_base: 300000,
        naming_rules: &[
            rule(r"(?P<burst_id>t\d{3}_\d{6}_iw\d)_mask\.tif$", "${burst_id}_mask"),
            rule(
                r"(?P<burst_id>t\d{3}_\d{6}_iw\d)_(?P<pol>VV|VH|HH|HV)\.tif$",
                "${burst_id}_${pol}",
            ),
            rule(r"(?P<burst_id>t\d{3}_\d{6}_iw\d)\.h5$", "${burst_id}"),
            rule(r"\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "DISP_S1",
        short_name: "disp_s1",
        file_prefix: "OPERA_L3_DISP-S1",
        error_code_base: 400000,
        naming_rules: &[required(r"\.nc$", "DISP"), rule(r"\.png$", "BROWSE")],
    },
    ProductSpec {
        identifier: "DSWX_S1",
        short_name: "dswx_s1",
        file_prefix: "OPERA_L3_DSWx-S1",
        error_code_base: 500000,
        naming_rules: &[
            required(r"_B01_WTR\.tif$", "B01_WTR"),
            rule(r"_B02_BWTR\.tif$", "B02_BWTR"),
            rule(r"_B03_CONF\.tif$", "B03_CONF"),
            rule(r"_B04_DIAG\.tif$", "B04_DIAG"),
            rule(r"_BROWSE\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "DIST_S1",
        short_name: "dist_s1",
        file_prefix: "OPERA_L3_DIST-ALERT-S1",
        error_code_base: 600000,
        naming_rules: &[
            required(r"_GEN-DIST-STATUS\.tif$", "GEN-DIST-STATUS"),
            rule(r"_GEN-METRIC\.tif$", "GEN-METRIC"),
            rule(r"\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "DSWX_NI",
        short_name: "dswx_ni",
        file_prefix: "OPERA_L3_DSWx-NI",
        error_code_base: 700000,
        naming_rules: &[
            required(r"_B01_WTR\.tif$", "B01_WTR"),
            rule(r"_B02_BWTR\.tif$", "B02_BWTR"),
            rule(r"_B03_CONF\.tif$", "B03_CONF"),
            rule(r"_BROWSE\.png$", "BROWSE"),
        ],
    },
    ProductSpec {
        identifier: "TROPO",
        short_name: "tropo",
        file_prefix: "OPERA_L4_TROPO-ZENITH",
        error_code_base: 800000,
        naming_rules: &[required(r"\.nc$", "TROPO"), rule(r"\.png$", "BROWSE")],
    },
    ProductSpec {
        identifier: "DISP_NI",
        short_name: "disp_ni",
        file_prefix: "OPERA_L3_DISP-NI",
        error_code_base: 900000,
        naming_rules: &[required(r"\.nc$", "DISP"), rule(r"\.png$", "BROWSE")],
    },
    ProductSpec {
        identifier: "CAL_DISP",
        short_name: "cal_disp",
        file_prefix: "OPERA_L4_CAL-DISP",
        error_code_base: 1000000,
        naming_rules: &[required(r"\.nc$", "CAL")],
    },
];

/// Look up a product by identifier (case-insensitive)
pub fn lookup(identifier: &str) -> Option<&'static ProductSpec> {
    PRODUCTS
        .iter()
        .find(|p| p.identifier.eq_ignore_ascii_case(identifier))
}

/// Lowercase name used for QA file names, known or not
pub fn short_name(identifier: &str) -> String {
    lookup(identifier)
        .map(|p| p.short_name.to_string())
        .unwrap_or_else(|| identifier.to_ascii_lowercase())
}

/// Canonical file prefix, falling back to the identifier itself
pub fn file_prefix(identifier: &str) -> String {
    lookup(identifier)
        .map(|p| p.file_prefix.to_string())
        .unwrap_or_else(|| identifier.to_string())
}
