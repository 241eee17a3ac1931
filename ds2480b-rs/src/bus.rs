use crate::{
    link::SerialLink,
    lock::{ExclusiveGuard, ExclusiveLock},
    ops::Ds2480b,
};
use onewire_host::{
    FamilyRegistry, OneWireMaster, OwDevice, OwResult, PowerArming, PowerDeliveryDuration,
    PowerLevel, ProgramPulseDuration, ResetStatus, RomAddress, Speed,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to one adapter.
///
/// Wraps the driver in the transaction lock so independent threads can each
/// run multi-primitive transactions atomically, and applies the transient
/// failure policy: one silent re-detect and retry inside the same locked
/// region, after which the failure surfaces.
pub struct OneWireBus<L: SerialLink> {
    lock: ExclusiveLock,
    dev: Mutex<Ds2480b<L>>,
    port: String,
    registry: FamilyRegistry,
    containers: Mutex<HashMap<RomAddress, Arc<dyn OwDevice>>>,
}

impl<L: SerialLink> OneWireBus<L> {
    /// Wraps an attached driver.
    pub fn new(dev: Ds2480b<L>) -> Self {
        Self::with_registry(dev, FamilyRegistry::with_defaults())
    }

    /// Wraps an attached driver with a custom family registry.
    pub fn with_registry(dev: Ds2480b<L>, registry: FamilyRegistry) -> Self {
        let port = dev.port_name().to_string();
        OneWireBus {
            lock: ExclusiveLock::new(),
            dev: Mutex::new(dev),
            port,
            registry,
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// The container for `rom`, built through the family registry on
    /// first sight and cached for the life of the handle.
    pub fn device_for(&self, rom: RomAddress) -> Arc<dyn OwDevice> {
        let mut containers = self
            .containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            containers
                .entry(rom)
                .or_insert_with(|| Arc::from(self.registry.device_for(rom))),
        )
    }

    /// The platform name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port
    }

    /// Claims the adapter for a multi-primitive transaction.
    pub fn begin_exclusive(&self) {
        self.lock.acquire();
    }

    /// Releases one [`OneWireBus::begin_exclusive`] claim.
    pub fn end_exclusive(&self) {
        self.lock.release();
    }

    /// RAII form of [`OneWireBus::begin_exclusive`].
    pub fn exclusive(&self) -> ExclusiveGuard<'_> {
        self.lock.guard()
    }

    fn dev(&self) -> MutexGuard<'_, Ds2480b<L>> {
        self.dev.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a whole transaction under the lock with direct access to the
    /// primitive surface; the route for device layers built on
    /// [`OneWireMaster`].
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Ds2480b<L>) -> OwResult<R>,
    ) -> OwResult<R> {
        let _claim = self.lock.guard();
        let mut dev = self.dev();
        f(&mut dev)
    }

    fn run<R>(&self, f: impl Fn(&mut Ds2480b<L>) -> OwResult<R>) -> OwResult<R> {
        let _claim = self.lock.guard();
        let mut dev = self.dev();
        match f(&mut dev) {
            Err(e) if e.is_transient() => {
                log::warn!("retrying after transient failure on {}: {e}", self.port);
                dev.detect()?;
                f(&mut dev)
            }
            other => other,
        }
    }

    /// Issues a 1-Wire reset.
    pub fn reset(&self) -> OwResult<ResetStatus> {
        self.run(|dev| dev.reset())
    }

    /// Writes one bit.
    pub fn put_bit(&self, bit: bool) -> OwResult<()> {
        self.run(|dev| dev.put_bit(bit))
    }

    /// Reads one bit.
    pub fn get_bit(&self) -> OwResult<bool> {
        self.run(|dev| dev.get_bit())
    }

    /// Writes one byte.
    pub fn put_byte(&self, byte: u8) -> OwResult<()> {
        self.run(|dev| dev.put_byte(byte))
    }

    /// Reads one byte.
    pub fn get_byte(&self) -> OwResult<u8> {
        self.run(|dev| dev.get_byte())
    }

    /// Bidirectional block transfer.
    pub fn block(&self, buf: &mut [u8]) -> OwResult<()> {
        let _claim = self.lock.guard();
        let mut dev = self.dev();
        let snapshot = buf.to_vec();
        match dev.block(buf) {
            Err(e) if e.is_transient() => {
                log::warn!("retrying block after transient failure on {}: {e}", self.port);
                buf.copy_from_slice(&snapshot);
                dev.detect()?;
                dev.block(buf)
            }
            other => other,
        }
    }

    /// Addresses one slave; true when presence was observed.
    pub fn select(&self, rom: RomAddress) -> OwResult<bool> {
        self.run(|dev| dev.select(rom))
    }

    /// Addresses one slave, failing when it does not answer.
    pub fn assert_select(&self, rom: RomAddress) -> OwResult<()> {
        self.run(|dev| dev.assert_select(rom))
    }

    /// Non-disturbing presence check.
    pub fn is_present(&self, rom: RomAddress) -> OwResult<bool> {
        self.run(|dev| dev.is_present(rom))
    }

    /// Non-disturbing alarm check.
    pub fn is_alarming(&self, rom: RomAddress) -> OwResult<bool> {
        self.run(|dev| dev.is_alarming(rom))
    }

    /// Restarts enumeration; true when a first slave was found.
    pub fn search_first(&self) -> OwResult<Option<RomAddress>> {
        self.run(|dev| dev.search_first())
    }

    /// Continues enumeration.
    pub fn search_next(&self) -> OwResult<Option<RomAddress>> {
        self.run(|dev| dev.search_next())
    }

    /// The slave found by the most recent search pass.
    pub fn address(&self) -> Option<RomAddress> {
        self.dev().address()
    }

    /// Restricts enumeration to `family` (additive).
    pub fn target_family(&self, family: u8) {
        self.dev().target_family(family);
    }

    /// Skips every slave of `family` during enumeration.
    pub fn exclude_family(&self, family: u8) {
        self.dev().exclude_family(family);
    }

    /// Clears the family filters.
    pub fn target_all(&self) {
        self.dev().target_all();
    }

    /// Enumerate only slaves in alarm state.
    pub fn set_search_only_alarming(&self, only: bool) {
        self.dev().set_search_only_alarming(only);
    }

    /// Enumerate every slave again.
    pub fn set_search_all(&self) {
        self.dev().set_search_all();
    }

    /// Skip the leading bus reset of each search pass.
    pub fn set_no_reset_search(&self, skip: bool) {
        self.dev().set_no_reset_search(skip);
    }

    /// Changes the signalling speed class.
    pub fn set_speed(&self, speed: Speed) -> OwResult<()> {
        self.run(|dev| dev.set_speed(speed))
    }

    /// Current signalling speed class.
    pub fn speed(&self) -> Speed {
        OneWireMaster::speed(&*self.dev())
    }

    /// Moves the bus into or out of overdrive.
    pub fn set_overdrive_mode(&self, enable: bool, rom: Option<RomAddress>) -> OwResult<()> {
        self.run(|dev| dev.set_overdrive_mode(enable, rom))
    }

    /// Changes the UART rate.
    pub fn change_baud(&self, baud: u32) -> OwResult<()> {
        self.run(|dev| dev.change_baud(baud))
    }

    /// Programs the strong-pullup duration.
    pub fn set_power_duration(&self, duration: PowerDeliveryDuration) -> OwResult<()> {
        self.run(|dev| dev.set_power_duration(duration))
    }

    /// Starts or arms strong-pullup power delivery.
    pub fn start_power_delivery(&self, arming: PowerArming) -> OwResult<()> {
        self.run(|dev| dev.start_power_delivery(arming))
    }

    /// Programs the 12V program-pulse duration.
    pub fn set_program_pulse_duration(&self, duration: ProgramPulseDuration) -> OwResult<()> {
        self.run(|dev| dev.set_program_pulse_duration(duration))
    }

    /// Fires or arms a 12V program pulse.
    pub fn start_program_pulse(&self, arming: PowerArming) -> OwResult<()> {
        self.run(|dev| dev.start_program_pulse(arming))
    }

    /// Forces the line to 0V.
    pub fn start_break(&self) -> OwResult<()> {
        self.transaction(|dev| dev.start_break())
    }

    /// Returns the line to the normal idle level.
    pub fn set_power_normal(&self) -> OwResult<()> {
        self.run(|dev| dev.set_power_normal())
    }

    /// Drive currently applied to the line.
    pub fn power_level(&self) -> PowerLevel {
        self.dev().power_level()
    }

    /// The adapter chip revision, once a reset has been seen.
    pub fn revision(&self) -> Option<u8> {
        self.dev().revision()
    }

    /// Whether a 12V program-pulse supply is available.
    pub fn can_program(&self) -> bool {
        self.dev().can_program()
    }

    /// Whether the adapter can signal at overdrive speed.
    pub fn can_overdrive(&self) -> bool {
        self.dev().can_overdrive()
    }

    /// Whether the adapter supports flexible regular-speed waveforms.
    pub fn can_flex(&self) -> bool {
        self.dev().can_flex()
    }

    /// Whether the adapter can deliver strong-pullup power.
    pub fn can_deliver_power(&self) -> bool {
        self.dev().can_deliver_power()
    }

    /// Whether power delivery can be throttled per-slave.
    pub fn can_deliver_smart_power(&self) -> bool {
        self.dev().can_deliver_smart_power()
    }

    /// Whether the adapter can force the line to 0V.
    pub fn can_break(&self) -> bool {
        self.dev().can_break()
    }

    /// Whether the adapter supports hyperdrive signalling.
    pub fn can_hyperdrive(&self) -> bool {
        self.dev().can_hyperdrive()
    }

    /// Closes the port, consuming the handle.
    pub fn close(self) -> OwResult<()> {
        let dev = self
            .dev
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        drop(dev.into_link());
        Ok(())
    }
}
