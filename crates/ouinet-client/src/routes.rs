//! The default route table: front-end and method bypasses are baked into
//! `RouteTable::select` itself, so the rule list here only needs to cover
//! ordinary GET/HEAD traffic (`spec.md` §4.6).

use std::collections::VecDeque;

use ouinet_07_request_router::{Predicate, RequestConfig, Responder, RouteTable, Rule};

/// Every ordinary request is cached and tried against the injector first,
/// falling back to a direct origin fetch if the injector is unreachable.
pub fn default_route_table() -> RouteTable {
    let everything = Rule::new(
        Predicate::Always,
        RequestConfig::new(true, [Responder::Injector, Responder::Origin]),
    );
    RouteTable::new(
        vec![everything],
        RequestConfig::new(false, VecDeque::from([Responder::Origin])),
    )
}
