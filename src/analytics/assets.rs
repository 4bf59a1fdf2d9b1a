/// Well-known pairs matched anywhere in the contract name.
const KNOWN_PAIRS: &[(&[&str], &str)] = &[
    (&["XBTUSD", "BTCUSD"], "BTC"),
    (&["ETHUSD"], "ETH"),
    (&["SOLUSD"], "SOL"),
    (&["XRPUSD"], "XRP"),
    (&["DOGEUSD"], "DOGE"),
    (&["ADAUSD"], "ADA"),
    (&["AVAXUSD"], "AVAX"),
    (&["MATICUSD"], "MATIC"),
    (&["DOTUSD"], "DOT"),
    (&["LINKUSD"], "LINK"),
];

/// Base asset of a Kraken contract (`PF_XBTUSD` -> `BTC`), `Unknown` otherwise.
pub fn asset_from_contract(contract: &str) -> String {
    let upper = contract.to_uppercase().replace("PF_", "").replace("FI_", "");

    for (needles, asset) in KNOWN_PAIRS {
        if needles.iter().any(|n| upper.contains(n)) {
            return (*asset).to_string();
        }
    }

    match upper.split_once("USD") {
        Some((base, _)) => {
            let base: String = base.chars().filter(|c| *c != '_' && *c != '-').collect();
            if base.is_empty() {
                "Unknown".to_string()
            } else {
                base
            }
        }
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_contracts() {
        assert_eq!(asset_from_contract("PF_XBTUSD"), "BTC");
        assert_eq!(asset_from_contract("pf_xbtusd"), "BTC");
        assert_eq!(asset_from_contract("Pi_XbTuSd"), "BTC");
        assert_eq!(asset_from_contract("FI_ETHUSD_241225"), "ETH");
        assert_eq!(asset_from_contract("FF_ETHUSD_240628"), "ETH");
        assert_eq!(asset_from_contract("PF_LINKUSD"), "LINK");
    }

    #[test]
    fn test_generic_extraction() {
        assert_eq!(asset_from_contract("PF_SUIUSD"), "SUI");
        assert_eq!(asset_from_contract("PI_LTCUSD"), "PILTC");
        assert_eq!(asset_from_contract("PF_1000-PEPEUSD"), "1000PEPE");
    }

    #[test]
    fn test_unknown_contracts() {
        assert_eq!(asset_from_contract(""), "Unknown");
        assert_eq!(asset_from_contract("BTC-PERP"), "Unknown");
        assert_eq!(asset_from_contract("USD"), "Unknown");
        assert_eq!(asset_from_contract("PF_USD"), "Unknown");
    }
}
