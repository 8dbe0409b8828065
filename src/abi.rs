//! Host ABI: wasm-style entry points over a thread-local engine.
//!
//! The host writes pattern/source/bytecode bytes into memory it obtained
//! from [`alloc`], calls an entry point, then reads the result buffer via
//! the getter pair. Handles are 1-based; 0 denotes error. Count-returning
//! calls report the staging-list length after the operation, so 0 doubles
//! as the empty/error result.
//!
//! All pointer-taking functions are `unsafe`: the caller guarantees each
//! `(ptr, len)` pair addresses `len` readable bytes.

use std::alloc::Layout;
use std::cell::RefCell;

use crate::engine::Engine;
use crate::language::Lang;

thread_local! {
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::new());
}

fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|engine| f(&mut engine.borrow_mut()))
}

unsafe fn str_arg<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    std::str::from_utf8(std::slice::from_raw_parts(ptr, len)).ok()
}

unsafe fn bytes_arg<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

// ---- memory ------------------------------------------------------------

#[no_mangle]
pub extern "C" fn alloc(size: usize) -> *mut u8 {
    let Ok(layout) = Layout::from_size_align(size.max(1), 1) else {
        return std::ptr::null_mut();
    };
    unsafe { std::alloc::alloc(layout) }
}

/// # Safety
/// `ptr` must come from [`alloc`] with the same `size`.
#[no_mangle]
pub unsafe extern "C" fn dealloc(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    let Ok(layout) = Layout::from_size_align(size.max(1), 1) else {
        return;
    };
    std::alloc::dealloc(ptr, layout);
}

// ---- one-shot and compiled matching ------------------------------------

/// # Safety
/// `(pat, plen)` and `(src, slen)` must address readable byte ranges.
#[no_mangle]
pub unsafe extern "C" fn struct_match(
    pat: *const u8,
    plen: usize,
    src: *const u8,
    slen: usize,
    lang: u8,
) -> u32 {
    let (Some(pattern), Some(source), Some(lang)) =
        (str_arg(pat, plen), str_arg(src, slen), Lang::from_tag(lang))
    else {
        return 0;
    };
    with_engine(|engine| engine.struct_match(pattern, source, lang))
}

/// # Safety
/// `(pat, plen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn compile_pattern(pat: *const u8, plen: usize, lang: u8) -> u32 {
    let (Some(pattern), Some(lang)) = (str_arg(pat, plen), Lang::from_tag(lang)) else {
        return 0;
    };
    with_engine(|engine| engine.compile_pattern(pattern, lang))
}

/// # Safety
/// `(src, slen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn match_pattern(pattern: u32, src: *const u8, slen: usize) -> u32 {
    let Some(source) = str_arg(src, slen) else {
        return 0;
    };
    with_engine(|engine| engine.match_pattern(pattern, source))
}

#[no_mangle]
pub extern "C" fn free_pattern(handle: u32) {
    with_engine(|engine| engine.free_pattern(handle));
}

/// # Safety
/// `(src, slen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn compile_source(src: *const u8, slen: usize, lang: u8) -> u32 {
    let (Some(source), Some(lang)) = (str_arg(src, slen), Lang::from_tag(lang)) else {
        return 0;
    };
    with_engine(|engine| engine.compile_source(source, lang))
}

#[no_mangle]
pub extern "C" fn match_compiled(pattern: u32, source: u32) -> u32 {
    with_engine(|engine| engine.match_compiled(pattern, source))
}

#[no_mangle]
pub extern "C" fn match_in_range(pattern: u32, source: u32, start: u32, end: u32) -> u32 {
    with_engine(|engine| engine.match_in_range(pattern, source, start, end))
}

#[no_mangle]
pub extern "C" fn free_source(handle: u32) {
    with_engine(|engine| engine.free_source(handle));
}

/// # Safety
/// `(kind, klen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn kind_match(kind: *const u8, klen: usize, source: u32) -> u32 {
    let Some(kind) = str_arg(kind, klen) else {
        return 0;
    };
    with_engine(|engine| engine.kind_match(kind, source))
}

#[no_mangle]
pub extern "C" fn match_preceding(source: u32, start: u32, end: u32) -> u32 {
    with_engine(|engine| engine.match_preceding(source, start, end))
}

#[no_mangle]
pub extern "C" fn match_following(source: u32, start: u32, end: u32) -> u32 {
    with_engine(|engine| engine.match_following(source, start, end))
}

// ---- match-set slots and filters ---------------------------------------

#[no_mangle]
pub extern "C" fn store_matches() -> u32 {
    with_engine(|engine| engine.store_matches())
}

#[no_mangle]
pub extern "C" fn filter_inside(refs: u32) -> u32 {
    with_engine(|engine| engine.filter_inside(refs))
}

#[no_mangle]
pub extern "C" fn filter_not_inside(refs: u32) -> u32 {
    with_engine(|engine| engine.filter_not_inside(refs))
}

#[no_mangle]
pub extern "C" fn filter_not(refs: u32) -> u32 {
    with_engine(|engine| engine.filter_not(refs))
}

#[no_mangle]
pub extern "C" fn intersect_matches(refs: u32) -> u32 {
    with_engine(|engine| engine.intersect_matches(refs))
}

#[no_mangle]
pub extern "C" fn free_matches(handle: u32) {
    with_engine(|engine| engine.free_matches(handle));
}

// ---- rulesets ----------------------------------------------------------

/// # Safety
/// `(bytes, len)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn load_ruleset(bytes: *const u8, len: usize) -> u32 {
    let Some(bytes) = bytes_arg(bytes, len) else {
        return 0;
    };
    with_engine(|engine| engine.load_ruleset(bytes))
}

/// # Safety
/// `(src, slen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn apply_ruleset(handle: u32, src: *const u8, slen: usize) -> u32 {
    let Some(source) = str_arg(src, slen) else {
        return 0;
    };
    with_engine(|engine| engine.apply_ruleset(handle, source))
}

#[no_mangle]
pub extern "C" fn free_ruleset(handle: u32) {
    with_engine(|engine| engine.free_ruleset(handle));
}

// ---- tree walk ---------------------------------------------------------

#[no_mangle]
pub extern "C" fn node_root(source: u32) -> u32 {
    with_engine(|engine| engine.node_root(source))
}

#[no_mangle]
pub extern "C" fn node_info(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_info(source, start, end, is_root != 0))
}

#[no_mangle]
pub extern "C" fn node_children(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_children(source, start, end, is_root != 0))
}

#[no_mangle]
pub extern "C" fn node_named_children(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_named_children(source, start, end, is_root != 0))
}

#[no_mangle]
pub extern "C" fn node_parent(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_parent(source, start, end, is_root != 0))
}

/// # Safety
/// `(name, nlen)` must address a readable byte range.
#[no_mangle]
pub unsafe extern "C" fn node_field_child(
    source: u32,
    start: u32,
    end: u32,
    is_root: u32,
    name: *const u8,
    nlen: usize,
) -> u32 {
    let Some(field) = str_arg(name, nlen) else {
        return 0;
    };
    with_engine(|engine| engine.node_field_child(source, start, end, is_root != 0, field))
}

#[no_mangle]
pub extern "C" fn node_next(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_next(source, start, end, is_root != 0))
}

#[no_mangle]
pub extern "C" fn node_prev(source: u32, start: u32, end: u32, is_root: u32) -> u32 {
    with_engine(|engine| engine.node_prev(source, start, end, is_root != 0))
}

// ---- result buffers ----------------------------------------------------

#[no_mangle]
pub extern "C" fn get_result_ptr() -> *const u8 {
    with_engine(|engine| engine.result.as_ptr())
}

#[no_mangle]
pub extern "C" fn get_result_len() -> usize {
    with_engine(|engine| engine.result.len())
}

#[no_mangle]
pub extern "C" fn get_ruleset_result_ptr() -> *const u8 {
    with_engine(|engine| engine.ruleset_result.as_ptr())
}

#[no_mangle]
pub extern "C" fn get_ruleset_result_len() -> usize {
    with_engine(|engine| engine.ruleset_result.len())
}
