//! Bluetooth SIG-assigned Company Identifiers.
//!
//! These show up in a few places in the Link-Layer and GAP: `LL_VERSION_IND` carries one to
//! identify the controller vendor, and `AdStructure::ManufacturerSpecificData` carries one to
//! disambiguate the payload that follows.

/// A 16-bit Bluetooth SIG Company Identifier.
///
/// See the [assigned numbers document][list] for the full, frequently updated list.
///
/// [list]: https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompanyId(u16);

impl CompanyId {
    /// Wraps a raw 16-bit company identifier.
    pub fn from_raw(raw: u16) -> Self {
        CompanyId(raw)
    }

    /// Returns the raw 16-bit value of this identifier.
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// A selection of company identifiers that come up in testing and examples.
#[allow(missing_docs)]
impl CompanyId {
    pub const ERICSSON: CompanyId = CompanyId(0);
    pub const NORDIC_SEMICONDUCTOR: CompanyId = CompanyId(89);
    pub const STMICROELECTRONICS: CompanyId = CompanyId(48);

    /// Not a registered identifier; used when no real vendor ID is available.
    pub const UNKNOWN: CompanyId = CompanyId(0xFFFF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_raw_value() {
        let id = CompanyId::from_raw(0x1234);
        assert_eq!(id.as_u16(), 0x1234);
    }
}
