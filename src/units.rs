//! Physical quantities with units, checked at runtime.
//!
//! Units form conversion families through a shared base unit (kilowatt-hours
//! convert to joules, minutes to seconds). Combining units across families is
//! only defined for the explicitly declared product relations; there is no
//! general dimensional analysis.

use std::collections::HashMap;
use std::fmt;
use std::ops::Neg;

use crate::error::{Error, Result};

/// A unit of measurement from the closed set the metering service understands.
///
/// Each unit is a conversion factor over a base unit, e.g. `Kilowatt` has
/// factor 1000 over `Watt`. A unit whose base is itself always has factor 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Watt,
    Kilowatt,
    Megawatt,
    Joule,
    KilowattHour,
}

impl Unit {
    /// Every unit, in declaration order. Used to build symbol registries.
    pub const ALL: [Unit; 8] = [
        Unit::Second,
        Unit::Minute,
        Unit::Hour,
        Unit::Watt,
        Unit::Kilowatt,
        Unit::Megawatt,
        Unit::Joule,
        Unit::KilowattHour,
    ];

    /// The symbol used on the wire and in display output.
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Hour => "h",
            Unit::Watt => "W",
            Unit::Kilowatt => "kW",
            Unit::Megawatt => "MW",
            Unit::Joule => "J",
            Unit::KilowattHour => "kW h",
        }
    }

    /// Conversion factor relative to the base unit.
    pub fn factor(self) -> f64 {
        match self {
            Unit::Second | Unit::Watt | Unit::Joule => 1.0,
            Unit::Minute => 60.0,
            Unit::Hour => 3600.0,
            Unit::Kilowatt => 1000.0,
            Unit::Megawatt => 1_000_000.0,
            Unit::KilowattHour => 3600.0 * 1000.0,
        }
    }

    /// The base unit of this unit's conversion family.
    pub fn base(self) -> Unit {
        match self {
            Unit::Second | Unit::Minute | Unit::Hour => Unit::Second,
            Unit::Watt | Unit::Kilowatt | Unit::Megawatt => Unit::Watt,
            Unit::Joule | Unit::KilowattHour => Unit::Joule,
        }
    }

    /// Whether values in this unit can be converted to `other`.
    pub fn is_convertible_to(self, other: Unit) -> bool {
        self.base() == other.base()
    }

    /// The declared product relations. Only `W x s = J` (in either operand
    /// order) exists; undeclared pairs are not derived.
    pub fn product(self, other: Unit) -> Option<Unit> {
        match (self, other) {
            (Unit::Watt, Unit::Second) | (Unit::Second, Unit::Watt) => Some(Unit::Joule),
            _ => None,
        }
    }

    /// The declared quotient relations, the inverses of [`Unit::product`].
    pub fn quotient(self, other: Unit) -> Option<Unit> {
        match (self, other) {
            (Unit::Joule, Unit::Second) => Some(Unit::Watt),
            (Unit::Joule, Unit::Watt) => Some(Unit::Second),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Immutable symbol lookup, built once at startup and passed by reference to
/// any code that turns wire symbols back into units.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    by_symbol: HashMap<&'static str, Unit>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        let mut by_symbol = HashMap::new();
        for unit in Unit::ALL {
            by_symbol.insert(unit.symbol(), unit);
        }
        Self { by_symbol }
    }

    /// Looks up a unit by its wire symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<Unit> {
        self.by_symbol.get(symbol).copied()
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable physical quantity: a numerical value paired with a unit.
///
/// Equality is structural; `3_600_000 J` and `1 kW h` compare unequal even
/// though they are physically the same amount. Convert first when comparing
/// across units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub const fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Whether this quantity can be converted to `unit`.
    pub fn is_convertible_to(&self, unit: Unit) -> bool {
        self.unit.is_convertible_to(unit)
    }

    /// Rescales this quantity into `unit`; the units must share a base.
    pub fn convert_to(&self, unit: Unit) -> Result<Quantity> {
        if !self.unit.is_convertible_to(unit) {
            return Err(Error::UnitMismatch {
                from: self.unit,
                to: unit,
            });
        }
        Ok(Quantity::new(
            self.value * self.unit.factor() / unit.factor(),
            unit,
        ))
    }

    /// Adds `other`, converted into this quantity's unit first.
    pub fn add(&self, other: Quantity) -> Result<Quantity> {
        let other = other.convert_to(self.unit)?;
        Ok(Quantity::new(self.value + other.value, self.unit))
    }

    /// Subtracts `other`, converted into this quantity's unit first.
    pub fn sub(&self, other: Quantity) -> Result<Quantity> {
        let other = other.convert_to(self.unit)?;
        Ok(Quantity::new(self.value - other.value, self.unit))
    }

    /// Scalar multiplication; the unit is unchanged.
    pub fn scale(&self, factor: f64) -> Quantity {
        Quantity::new(self.value * factor, self.unit)
    }

    /// Multiplies by a unit through the declared product table.
    ///
    /// An undeclared pair is retried with this quantity converted to its base
    /// unit; a second miss fails with `IncompatibleUnits`.
    pub fn mul_unit(&self, unit: Unit) -> Result<Quantity> {
        if let Some(product) = self.unit.product(unit) {
            return Ok(Quantity::new(self.value, product));
        }
        let in_base = self.convert_to(self.unit.base())?;
        match in_base.unit.product(unit) {
            Some(product) => Ok(Quantity::new(in_base.value, product)),
            None => Err(Error::IncompatibleUnits {
                left: self.unit,
                right: unit,
            }),
        }
    }

    /// Multiplies by another quantity; unit combination follows
    /// [`Quantity::mul_unit`].
    pub fn mul_quantity(&self, other: Quantity) -> Result<Quantity> {
        if let Some(product) = self.unit.product(other.unit) {
            return Ok(Quantity::new(self.value * other.value, product));
        }
        let in_base = self.convert_to(self.unit.base())?;
        match in_base.unit.product(other.unit) {
            Some(product) => Ok(Quantity::new(in_base.value * other.value, product)),
            None => Err(Error::IncompatibleUnits {
                left: self.unit,
                right: other.unit,
            }),
        }
    }

    /// Divides by a unit through the declared quotient table, with the same
    /// base-unit retry as multiplication.
    pub fn div_unit(&self, unit: Unit) -> Result<Quantity> {
        if let Some(quotient) = self.unit.quotient(unit) {
            return Ok(Quantity::new(self.value, quotient));
        }
        let in_base = self.convert_to(self.unit.base())?;
        match in_base.unit.quotient(unit) {
            Some(quotient) => Ok(Quantity::new(in_base.value, quotient)),
            None => Err(Error::IncompatibleUnits {
                left: self.unit,
                right: unit,
            }),
        }
    }

    /// Divides by another quantity. Identical units cancel into a bare
    /// ratio; otherwise the declared quotient table applies, with the
    /// base-unit retry.
    pub fn div_quantity(&self, other: Quantity) -> Result<Quotient> {
        if let Some(quotient) = self.unit.quotient(other.unit) {
            return Ok(Quotient::Quantity(Quantity::new(
                self.value / other.value,
                quotient,
            )));
        }
        if self.unit == other.unit {
            return Ok(Quotient::Ratio(self.value / other.value));
        }
        let in_base = self.convert_to(self.unit.base())?;
        if let Some(quotient) = in_base.unit.quotient(other.unit) {
            return Ok(Quotient::Quantity(Quantity::new(
                in_base.value / other.value,
                quotient,
            )));
        }
        if in_base.unit == other.unit {
            return Ok(Quotient::Ratio(in_base.value / other.value));
        }
        Err(Error::IncompatibleUnits {
            left: self.unit,
            right: other.unit,
        })
    }
}

/// Dividing one quantity by another either yields a new quantity or, when
/// the units cancel, a bare ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quotient {
    Quantity(Quantity),
    Ratio(f64),
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Quantity {
        Quantity::new(-self.value, self.unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
