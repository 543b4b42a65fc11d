use semnet::config::EngineConfig;
use semnet::types::{Constancy, Direction, ElementType, Permanence, RoleTag, Sign};
use semnet::{create_context, AccessLevel, Context};

pub fn rw_context() -> Context {
    create_context(AccessLevel::ReadWrite, "test-user", EngineConfig::default())
}

pub fn const_class() -> ElementType {
    ElementType::node(Constancy::Const, RoleTag::Class)
}

pub fn access_const_perm_pos() -> ElementType {
    ElementType::connector(Constancy::Const, Direction::Access, Permanence::Perm, Sign::Positive)
}

pub fn link_const() -> ElementType {
    ElementType::link(Constancy::Const)
}

pub fn var_node() -> ElementType {
    ElementType::node(Constancy::Var, RoleTag::Plain)
}
