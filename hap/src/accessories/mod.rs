mod state;
mod switch;

pub(crate) use switch::Hs1xxSwitchAccessory;
