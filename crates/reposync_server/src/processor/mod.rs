//! Per-phase processors, one `impl RequestHandler` block each.

mod block;
mod branch;
mod checktx;
mod commit;
mod fs;
