//! Element type algebra: the 16-bit flag bag encoding an element's kind,
//! constancy, and role/direction/permanence/sign bits.
use crate::error::{EngineError, EngineResult};

const KIND_SHIFT: u16 = 0;
const KIND_MASK: u16 = 0b11 << KIND_SHIFT;
const CONSTANCY_SHIFT: u16 = 2;
const CONSTANCY_MASK: u16 = 0b11 << CONSTANCY_SHIFT;
const DIRECTION_SHIFT: u16 = 4;
const DIRECTION_MASK: u16 = 0b11 << DIRECTION_SHIFT;
const PERMANENCE_SHIFT: u16 = 6;
const PERMANENCE_MASK: u16 = 0b1 << PERMANENCE_SHIFT;
const SIGN_SHIFT: u16 = 7;
const SIGN_MASK: u16 = 0b11 << SIGN_SHIFT;
const ROLE_TAG_SHIFT: u16 = 9;
const ROLE_TAG_MASK: u16 = 0b111 << ROLE_TAG_SHIFT;

/// What kind of element a type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A plain node.
    Node,
    /// A link carrying binary content.
    Link,
    /// A connector (edge-like element with source/target).
    Connector,
}

/// Const/var/unknown constancy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constancy {
    /// Fixed, non-variable element.
    Const,
    /// Variable element (used as a pattern placeholder).
    Var,
    /// Not yet specialized; may be narrowed to `Const` or `Var`.
    Unknown,
}

/// Connector directionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Symmetric connector with no preferred traversal direction.
    UndirectedCommon,
    /// Ordinary directed connector.
    DirectedCommon,
    /// Access/membership connector (e.g. class-to-member).
    Access,
}

/// Connector lifetime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permanence {
    /// Persists until explicitly erased.
    Perm,
    /// Intended to be short-lived (e.g. search scratch arcs).
    Temp,
}

/// Connector polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Positive/affirmative connector.
    Positive,
    /// Negative connector.
    Negative,
    /// Fuzzy/uncertain connector.
    Fuzzy,
}

/// Node role classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTag {
    /// No particular role.
    Plain,
    /// Ordered tuple node.
    Tuple,
    /// Structure node (container of triples).
    Structure,
    /// Role-relation node (names a position in an n-ary relation).
    RoleRelation,
    /// Non-role relation node.
    NonRoleRelation,
    /// Class node.
    Class,
    /// Abstract concept node.
    Abstract,
    /// Material (concrete) concept node.
    Material,
}

/// 16-bit element type bitfield.
///
/// Immutable after creation except for [`ElementType::specialize_constancy`],
/// which narrows `Unknown` to a concrete constancy.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType(u16);

impl ElementType {
    const fn with_field(self, mask: u16, shift: u16, value: u16) -> Self {
        Self((self.0 & !mask) | ((value << shift) & mask))
    }

    const fn field(self, mask: u16, shift: u16) -> u16 {
        (self.0 & mask) >> shift
    }

    /// Builds a node type with the given constancy and role tag.
    #[must_use]
    pub const fn node(constancy: Constancy, role_tag: RoleTag) -> Self {
        Self(0)
            .with_field(KIND_MASK, KIND_SHIFT, Kind::Node as u16)
            .with_field(CONSTANCY_MASK, CONSTANCY_SHIFT, constancy as u16)
            .with_field(ROLE_TAG_MASK, ROLE_TAG_SHIFT, role_tag as u16)
    }

    /// Builds a link type with the given constancy.
    #[must_use]
    pub const fn link(constancy: Constancy) -> Self {
        Self(0)
            .with_field(KIND_MASK, KIND_SHIFT, Kind::Link as u16)
            .with_field(CONSTANCY_MASK, CONSTANCY_SHIFT, constancy as u16)
    }

    /// Builds a connector type with the given constancy, direction, permanence and sign.
    #[must_use]
    pub const fn connector(
        constancy: Constancy,
        direction: Direction,
        permanence: Permanence,
        sign: Sign,
    ) -> Self {
        Self(0)
            .with_field(KIND_MASK, KIND_SHIFT, Kind::Connector as u16)
            .with_field(CONSTANCY_MASK, CONSTANCY_SHIFT, constancy as u16)
            .with_field(DIRECTION_MASK, DIRECTION_SHIFT, direction as u16)
            .with_field(PERMANENCE_MASK, PERMANENCE_SHIFT, permanence as u16)
            .with_field(SIGN_MASK, SIGN_SHIFT, sign as u16)
    }

    /// Returns the element kind.
    #[must_use]
    pub const fn kind(self) -> Kind {
        match self.field(KIND_MASK, KIND_SHIFT) {
            0 => Kind::Node,
            1 => Kind::Link,
            _ => Kind::Connector,
        }
    }

    /// Returns `true` if this is a node type.
    #[must_use]
    pub const fn is_node(self) -> bool {
        matches!(self.kind(), Kind::Node)
    }

    /// Returns `true` if this is a link type.
    #[must_use]
    pub const fn is_link(self) -> bool {
        matches!(self.kind(), Kind::Link)
    }

    /// Returns `true` if this is a connector type.
    #[must_use]
    pub const fn is_connector(self) -> bool {
        matches!(self.kind(), Kind::Connector)
    }

    /// Returns the constancy flag.
    #[must_use]
    pub const fn constancy(self) -> Constancy {
        match self.field(CONSTANCY_MASK, CONSTANCY_SHIFT) {
            0 => Constancy::Const,
            1 => Constancy::Var,
            _ => Constancy::Unknown,
        }
    }

    /// Returns `true` if the constancy is `Const`.
    #[must_use]
    pub const fn is_const(self) -> bool {
        matches!(self.constancy(), Constancy::Const)
    }

    /// Returns `true` if the constancy is `Var`.
    #[must_use]
    pub const fn is_var(self) -> bool {
        matches!(self.constancy(), Constancy::Var)
    }

    /// Returns `true` if the constancy is `Unknown`.
    #[must_use]
    pub const fn is_unknown_constancy(self) -> bool {
        matches!(self.constancy(), Constancy::Unknown)
    }

    /// Returns the connector direction, if this is a connector type.
    #[must_use]
    pub const fn direction(self) -> Option<Direction> {
        if !self.is_connector() {
            return None;
        }
        Some(match self.field(DIRECTION_MASK, DIRECTION_SHIFT) {
            0 => Direction::UndirectedCommon,
            1 => Direction::DirectedCommon,
            _ => Direction::Access,
        })
    }

    /// Returns the connector permanence, if this is a connector type.
    #[must_use]
    pub const fn permanence(self) -> Option<Permanence> {
        if !self.is_connector() {
            return None;
        }
        Some(match self.field(PERMANENCE_MASK, PERMANENCE_SHIFT) {
            0 => Permanence::Perm,
            _ => Permanence::Temp,
        })
    }

    /// Returns the connector sign, if this is a connector type.
    #[must_use]
    pub const fn sign(self) -> Option<Sign> {
        if !self.is_connector() {
            return None;
        }
        Some(match self.field(SIGN_MASK, SIGN_SHIFT) {
            0 => Sign::Positive,
            1 => Sign::Negative,
            _ => Sign::Fuzzy,
        })
    }

    /// Returns the node role tag, if this is a node type.
    #[must_use]
    pub const fn role_tag(self) -> Option<RoleTag> {
        if !self.is_node() {
            return None;
        }
        Some(match self.field(ROLE_TAG_MASK, ROLE_TAG_SHIFT) {
            0 => RoleTag::Plain,
            1 => RoleTag::Tuple,
            2 => RoleTag::Structure,
            3 => RoleTag::RoleRelation,
            4 => RoleTag::NonRoleRelation,
            5 => RoleTag::Class,
            6 => RoleTag::Abstract,
            _ => RoleTag::Material,
        })
    }

    /// Returns the raw bit pattern, e.g. for wire serialization.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Narrows an `Unknown` constancy to a concrete `Const`/`Var` value.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if the current constancy is not
    /// `Unknown`, or [`EngineError::InvalidParams`] if `new_constancy` is
    /// itself `Unknown` (specialization must produce a concrete type).
    pub const fn specialize_constancy(self, new_constancy: Constancy) -> EngineResult<Self> {
        if !self.is_unknown_constancy() {
            return Err(EngineError::InvalidState);
        }
        if matches!(new_constancy, Constancy::Unknown) {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.with_field(CONSTANCY_MASK, CONSTANCY_SHIFT, new_constancy as u16))
    }
}

impl core::fmt::Debug for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElementType")
            .field("kind", &self.kind())
            .field("constancy", &self.constancy())
            .field("direction", &self.direction())
            .field("permanence", &self.permanence())
            .field("sign", &self.sign())
            .field("role_tag", &self.role_tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_round_trips_role_tag() {
        let ty = ElementType::node(Constancy::Const, RoleTag::Class);
        assert!(ty.is_node());
        assert!(ty.is_const());
        assert_eq!(ty.role_tag(), Some(RoleTag::Class));
        assert_eq!(ty.direction(), None);
    }

    #[test]
    fn connector_round_trips_all_fields() {
        let ty = ElementType::connector(
            Constancy::Const,
            Direction::Access,
            Permanence::Perm,
            Sign::Positive,
        );
        assert!(ty.is_connector());
        assert_eq!(ty.direction(), Some(Direction::Access));
        assert_eq!(ty.permanence(), Some(Permanence::Perm));
        assert_eq!(ty.sign(), Some(Sign::Positive));
        assert_eq!(ty.role_tag(), None);
    }

    #[test]
    fn specialize_unknown_to_const() {
        let ty = ElementType::node(Constancy::Unknown, RoleTag::Plain);
        let specialized = ty.specialize_constancy(Constancy::Const).unwrap();
        assert!(specialized.is_const());
    }

    #[test]
    fn specialize_rejects_already_concrete() {
        let ty = ElementType::node(Constancy::Const, RoleTag::Plain);
        assert_eq!(
            ty.specialize_constancy(Constancy::Var),
            Err(EngineError::InvalidState)
        );
    }

    #[test]
    fn specialize_rejects_unknown_target() {
        let ty = ElementType::node(Constancy::Unknown, RoleTag::Plain);
        assert_eq!(
            ty.specialize_constancy(Constancy::Unknown),
            Err(EngineError::InvalidParams)
        );
    }
}
