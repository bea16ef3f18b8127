pub(crate) mod switch;
