/// IoU vehicle tracker with stability and cooldown gating for secondary captures
///
pub mod vehicle;
