//! Known EarthCARE catalogue identifiers.

pub const COLLECTIONS: &[&str] = &[
    "EarthCAREAuxiliary",
    "EarthCAREL2Validated",
    "EarthCAREL2InstChecked",
    "EarthCAREL2Products",
    "JAXAL2Validated",
    "JAXAL2InstChecked",
    "JAXAL2Products",
    "EarthCAREL0L1Products",
    "EarthCAREL1Validated",
    "EarthCAREL1InstChecked",
    "EarthCAREOrbitData",
];

pub const PRODUCTS: &[&str] = &[
    // ATLID level 1b
    "ATL_NOM_1B", "ATL_DCC_1B", "ATL_CSC_1B", "ATL_FSC_1B",
    // MSI level 1b
    "MSI_NOM_1B", "MSI_BBS_1B", "MSI_SD1_1B", "MSI_SD2_1B",
    // BBR level 1b
    "BBR_NOM_1B", "BBR_SNG_1B", "BBR_SOL_1B", "BBR_LIN_1B",
    // CPR level 1b
    "CPR_NOM_1B",
    // MSI level 1c
    "MSI_RGR_1C",
    // level 1d
    "AUX_MET_1D", "AUX_JSG_1D",
    // ATLID level 2a
    "ATL_FM__2A", "ATL_AER_2A", "ATL_ICE_2A", "ATL_TC__2A", "ATL_EBD_2A", "ATL_CTH_2A",
    "ATL_ALD_2A",
    // MSI level 2a
    "MSI_CM__2A", "MSI_COP_2A", "MSI_AOT_2A",
    // CPR level 2a
    "CPR_FMR_2A", "CPR_CD__2A", "CPR_TC__2A", "CPR_CLD_2A", "CPR_APC_2A",
    // ATLID-MSI level 2b
    "AM__MO__2B", "AM__CTH_2B", "AM__ACD_2B",
    // ATLID-CPR level 2b
    "AC__TC__2B",
    // BBR-MSI-(ATLID) level 2b
    "BM__RAD_2B", "BMA_FLX_2B",
    // ATLID-CPR-MSI level 2b
    "ACM_CAP_2B", "ACM_COM_2B", "ACM_RT__2B",
    // ATLID-CPR-MSI-BBR
    "ALL_DF__2B", "ALL_3D__2B",
    // orbit data
    "MPL_ORBSCT", "AUX_ORBPRE", "AUX_ORBRES",
];

pub const BASELINES: &[&str] = &["AC", "AD", "AE", "BA", "BB"];

pub fn is_known_collection(name: &str) -> bool {
    COLLECTIONS.contains(&name)
}

pub fn is_known_product(name: &str) -> bool {
    PRODUCTS.contains(&name)
}

pub fn is_known_baseline(name: &str) -> bool {
    BASELINES.contains(&name)
}

/// `productType` value the catalogue expects for a product. Most products are
/// searched by their own name.
pub fn search_code(product: &str) -> &str {
    match product {
        "ATL_ALD_2A" => "AALD",
        "ATL_FM__2A" => "AFM",
        "ATL_EBD_2A" => "AEBD",
        "ATL_CTH_2A" => "ACTH",
        other => other,
    }
}

/// Processing baseline encoded in a product title such as
/// `ECA_EXBA_ATL_NOM_1B_20240810T123000Z_...`: the two characters after the
/// agency code.
pub fn baseline_of(title: &str) -> Option<&str> {
    let rest = title.strip_prefix("ECA_")?;
    let code = rest.get(..4)?;
    if rest.as_bytes().get(4) != Some(&b'_') || !code.is_ascii() {
        return None;
    }
    Some(&code[2..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_of() {
        assert_eq!(baseline_of("ECA_EXBA_ATL_NOM_1B_20240810T1230Z"), Some("BA"));
        assert_eq!(baseline_of("ECA_JXAE_CPR_CLP_2A_20240810T1230Z"), Some("AE"));
        assert_eq!(baseline_of("ECA_EXB"), None);
        assert_eq!(baseline_of("ECA_EXBAXATL"), None);
        assert_eq!(baseline_of("S2A_MSIL1C"), None);
    }

    #[test]
    fn test_search_code() {
        assert_eq!(search_code("ATL_ALD_2A"), "AALD");
        assert_eq!(search_code("ATL_NOM_1B"), "ATL_NOM_1B");
    }

    #[test]
    fn test_known_identifiers() {
        assert!(is_known_collection("EarthCAREL2Validated"));
        assert!(!is_known_collection("earthcarel2validated"));
        assert!(is_known_product("ATL_NOM_1B"));
        assert!(!is_known_product("NOPE"));
        assert!(is_known_baseline("BB"));
        assert!(!is_known_baseline("B01"));
    }
}
