//! Lua scripts for versioned call state writes.
//!
//! Each channel record is a hash with two fields:
//! - `version`: monotonically increasing write counter
//! - `data`: JSON-encoded channel state, absent once deleted
//!
//! Deleting drops `data` but keeps `version`, so a record created again on
//! the same key continues the count instead of restarting at 1.
//!
//! The script compares the stored version to the caller's expectation and
//! writes atomically, so concurrent writers from different nodes cannot lose
//! each other's updates.

/// Compare-and-set on a versioned hash.
///
/// Arguments:
/// - KEYS[1]: State key (e.g., `calls:channel:{id}:state`)
/// - ARGV[1]: Expected version, `0` when the key was never written
/// - ARGV[2]: Operation, `set` or `del`
/// - ARGV[3]: JSON data (ignored for `del`)
///
/// Returns:
/// - 1: Success (written or deleted)
/// - 0: Version mismatch
/// - -1: Error (invalid arguments)
pub const COMPARE_AND_SET: &str = r#"
local expected = tonumber(ARGV[1])
if expected == nil then
    return -1
end

local current = redis.call('HGET', KEYS[1], 'version')
if current == nil or current == false then
    current = 0
else
    current = tonumber(current)
    if current == nil then
        return -1
    end
end

if current ~= expected then
    return 0
end

if ARGV[2] == 'del' then
    redis.call('HDEL', KEYS[1], 'data')
    redis.call('HSET', KEYS[1], 'version', current + 1)
    return 1
end

if ARGV[2] ~= 'set' then
    return -1
end

redis.call('HSET', KEYS[1], 'version', current + 1, 'data', ARGV[3])
return 1
"#;
