pub(crate) mod check;
pub(crate) mod run;
pub(crate) mod sla;
pub(crate) mod transitions;
