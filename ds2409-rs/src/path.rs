use crate::{CouplerChannel, Ds2409};
use onewire_host::{OneWireMaster, OwError, OwResult, ResetStatus, RomAddress};
use std::fmt;

/// One hop of a path: a coupler and the channel to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathElement {
    /// The coupler switched on this hop.
    pub coupler: RomAddress,
    /// The channel leading toward the target segment.
    pub channel: CouplerChannel,
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.coupler, self.channel)
    }
}

/// A route through coupler-switched segments to a remote sub-bus.
///
/// Paths are immutable values tied to the adapter they were created on; the
/// empty path is the root segment wired directly to the adapter. Equality
/// and hashing are by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwPath {
    adapter: String,
    port: String,
    elements: Vec<PathElement>,
}

impl OwPath {
    /// The root path of an adapter, addressing the segment at the port
    /// itself.
    pub fn root(adapter: impl Into<String>, port: impl Into<String>) -> Self {
        OwPath {
            adapter: adapter.into(),
            port: port.into(),
            elements: Vec::new(),
        }
    }

    /// A copy of this path descending through one more coupler channel.
    pub fn extend(&self, coupler: RomAddress, channel: CouplerChannel) -> OwResult<OwPath> {
        // Only coupler slaves can carry a path hop.
        Ds2409::new(coupler)?;
        let mut elements = self.elements.clone();
        elements.push(PathElement { coupler, channel });
        Ok(OwPath {
            adapter: self.adapter.clone(),
            port: self.port.clone(),
            elements,
        })
    }

    /// The adapter name this path is tied to.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// The port name this path is tied to.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// The hops of this path in bus order.
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// True when this path addresses the segment at the port itself.
    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether `other` lies strictly below this path: same adapter, and
    /// this element list is a strict prefix of the other's. A path is not
    /// its own parent.
    pub fn is_parent_of(&self, other: &OwPath) -> bool {
        self.same_adapter(other)
            && self.elements.len() < other.elements.len()
            && other.elements[..self.elements.len()] == self.elements[..]
    }

    /// The longest path that is a parent of (or equal to) both.
    ///
    /// # Errors
    /// Fails with [`OwError::InvalidArgument`] when the paths belong to
    /// different adapters.
    pub fn common_parent(&self, other: &OwPath) -> OwResult<OwPath> {
        if !self.same_adapter(other) {
            return Err(OwError::InvalidArgument(format!(
                "paths on different adapters: {}_{} vs {}_{}",
                self.adapter, self.port, other.adapter, other.port
            )));
        }
        let shared = self
            .elements
            .iter()
            .zip(&other.elements)
            .take_while(|(a, b)| a == b)
            .count();
        Ok(OwPath {
            adapter: self.adapter.clone(),
            port: self.port.clone(),
            elements: self.elements[..shared].to_vec(),
        })
    }

    fn same_adapter(&self, other: &OwPath) -> bool {
        self.adapter == other.adapter && self.port == other.port
    }

    /// Opens the path: walks the hops in order, switching each coupler's
    /// channel on via smart-on. Safe to repeat; the switches converge.
    ///
    /// The empty path issues a bare bus reset.
    pub fn open<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<()> {
        if self.elements.is_empty() {
            return match bus.reset()? {
                ResetStatus::Short => Err(OwError::BusShort),
                _ => Ok(()),
            };
        }
        for element in &self.elements {
            let coupler = Ds2409::new(element.coupler)?;
            coupler.smart_on(bus, element.channel)?;
        }
        Ok(())
    }

    /// Closes the path: walks the hops in reverse, switching every coupler
    /// off. Safe to repeat.
    pub fn close<T: OneWireMaster>(&self, bus: &mut T) -> OwResult<()> {
        for element in self.elements.iter().rev() {
            let coupler = Ds2409::new(element.coupler)?;
            coupler.all_lines_off(bus)?;
        }
        Ok(())
    }
}

impl fmt::Display for OwPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.adapter, self.port)?;
        for element in &self.elements {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}
