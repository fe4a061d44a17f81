// Copyright 2026 TierIndex Project Authors. Licensed under Apache-2.0.

//! Server-side scripts. All list/hash transitions of one call happen inside
//! a single script, which is what makes hand-out and reconciliation atomic
//! under the store's single-threaded execution.

/// Apply a batch of ADD/DELETE entry commands.
///
/// `ARGV[1]` = database, `ARGV[2]` = table, `ARGV[3]` = JSON array of
/// per-iteration merge size caps, `ARGV[4..]` = entry JSON documents with a
/// `cmd` discriminator.
///
/// ADD upserts the entry into its `files:<db>:<table>:<date=…>` hash,
/// records its partition in `folders:<db>:<table>`, and folds the path into
/// the open tail bucket of the partition's idle merge list (a new bucket is
/// started when the tail would overflow the iteration's size cap). DELETE
/// removes the hash field and enqueues the pre-built drop plan onto
/// `drop:<db>:<table>:idle`.
pub const PATCH_INDEX: &str = r#"
local database = ARGV[1]
local tbl = ARGV[2]
local max_sizes = cjson.decode(ARGV[3])

local function partition_of(path)
    return string.match(path, "^([^/]+/[^/]+)/")
end

local function files_key(path)
    local day = string.match(path, "^([^/]+)/")
    return "files:" .. database .. ":" .. tbl .. ":" .. day
end

local function fold_into_merge(entry, iteration)
    local key = "merge:" .. database .. ":" .. tbl .. ":" .. iteration
        .. ":" .. partition_of(entry.path) .. ":idle"
    local last = redis.call("LINDEX", key, -1)
    if last then
        local bucket = cjson.decode(last)
        if bucket.size + entry.size_bytes <= max_sizes[iteration] then
            bucket.size = bucket.size + entry.size_bytes
            table.insert(bucket.paths, entry.path)
            redis.call("LSET", key, -1, cjson.encode(bucket))
            return
        end
    end
    local bucket = {paths = {entry.path}, size = entry.size_bytes}
    redis.call("RPUSH", key, cjson.encode(bucket))
end

local processed = 0
for i = 4, #ARGV do
    local entry = cjson.decode(ARGV[i])
    local iteration = tonumber(string.match(entry.path, "%.(%d+)%.[^%.]+$"))
    if not iteration then
        return redis.error_reply("invalid file path: " .. (entry.path or "?"))
    end
    if entry.cmd == "DELETE" then
        redis.call("HDEL", files_key(entry.path), entry.path)
        local plan = {
            id = entry.drop_id,
            writer_id = entry.writer_id,
            layer = entry.layer,
            database = database,
            table = tbl,
            path = entry.path,
            time_s = entry.drop_time_s,
        }
        redis.call("RPUSH", "drop:" .. database .. ":" .. tbl .. ":idle", cjson.encode(plan))
    else
        redis.call("HSET", files_key(entry.path), entry.path, cjson.encode(entry))
        redis.call("HSET", "folders:" .. database .. ":" .. tbl, partition_of(entry.path), "1")
        if iteration <= #max_sizes then
            fold_into_merge(entry, iteration)
        end
    end
    processed = processed + 1
end
return processed
"#;

/// Atomically move the first idle task to the writer's processing list.
///
/// `KEYS[1]` = queue base key (`<prefix>:<db>:<table>[:<suffix>]`),
/// `ARGV[1]` = writer id, `ARGV[2]` = id to assign when the task has none,
/// `ARGV[3]` = current unix seconds, or `""` to ignore scheduling.
///
/// A task carrying a future `time_s` stays queued and nothing is returned.
pub const POP_TASK: &str = r#"
local base = KEYS[1]
local writer = ARGV[1]
local new_id = ARGV[2]
local now_s = tonumber(ARGV[3])

local raw = redis.call("LINDEX", base .. ":idle", 0)
if not raw then
    return false
end
local task = cjson.decode(raw)
if now_s and task.time_s and task.time_s > now_s then
    return false
end
redis.call("LPOP", base .. ":idle")
if not task.id or task.id == "" then
    task.id = new_id
    raw = cjson.encode(task)
end
redis.call("RPUSH", base .. ":" .. writer .. ":processing", raw)
return raw
"#;
