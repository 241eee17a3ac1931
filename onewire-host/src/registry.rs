use crate::{consts::FAMILY_COUPLER, rom::RomAddress};
use std::collections::HashMap;

/// A slave known to the host, produced by the family registry.
///
/// Containers are shared between enumeration and caller threads once
/// cached, so they are `Send + Sync`.
pub trait OwDevice: Send + Sync {
    /// The slave's ROM address.
    fn rom(&self) -> RomAddress;
    /// Human-readable name of the slave type.
    fn family_name(&self) -> &'static str;
}

/// Factory producing a device container for one family code.
pub type DeviceFactory = fn(RomAddress) -> Box<dyn OwDevice>;

/// Closed mapping from family code to device factory.
///
/// Populated statically with the families the workspace knows about;
/// unknown families fall back to a generic container. Custom families plug
/// in by registering at open time.
pub struct FamilyRegistry {
    factories: HashMap<u8, DeviceFactory>,
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FamilyRegistry {
    /// An empty registry; every lookup yields the generic container.
    pub fn new() -> Self {
        FamilyRegistry {
            factories: HashMap::new(),
        }
    }

    /// The registry preloaded with the well-known family codes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(0x01, |rom| Box::new(NamedDevice::new(rom, "DS1990A serial number")));
        registry.register(0x10, |rom| Box::new(NamedDevice::new(rom, "DS1920 thermometer")));
        registry.register(0x12, |rom| Box::new(NamedDevice::new(rom, "DS2406 dual switch")));
        registry.register(FAMILY_COUPLER, |rom| Box::new(NamedDevice::new(rom, "DS2409 coupler")));
        registry.register(0x26, |rom| Box::new(NamedDevice::new(rom, "DS2438 battery monitor")));
        registry.register(0x28, |rom| Box::new(NamedDevice::new(rom, "DS18B20 thermometer")));
        registry.register(0x3a, |rom| Box::new(NamedDevice::new(rom, "DS2413 dual switch")));
        registry
    }

    /// Registers (or replaces) the factory for one family code.
    pub fn register(&mut self, family: u8, factory: DeviceFactory) {
        self.factories.insert(family, factory);
    }

    /// Builds the container for `rom`, falling back to the generic one.
    pub fn device_for(&self, rom: RomAddress) -> Box<dyn OwDevice> {
        match self.factories.get(&rom.family()) {
            Some(factory) => factory(rom),
            None => Box::new(NamedDevice::new(rom, "unknown 1-Wire device")),
        }
    }
}

/// Generic container carrying nothing but identity.
struct NamedDevice {
    rom: RomAddress,
    name: &'static str,
}

impl NamedDevice {
    fn new(rom: RomAddress, name: &'static str) -> Self {
        NamedDevice { rom, name }
    }
}

impl OwDevice for NamedDevice {
    fn rom(&self) -> RomAddress {
        self.rom
    }

    fn family_name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod test {
    use super::FamilyRegistry;
    use crate::rom::RomAddress;

    #[test]
    fn known_family_resolves_and_unknown_falls_back() {
        let registry = FamilyRegistry::with_defaults();
        let coupler = RomAddress::from_bytes_unchecked([0x1f, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(registry.device_for(coupler).family_name(), "DS2409 coupler");
        let other = RomAddress::from_bytes_unchecked([0x77, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(registry.device_for(other).family_name(), "unknown 1-Wire device");
        assert_eq!(registry.device_for(other).rom(), other);
    }
}
