//! Scoped effective-privilege drop for reading job output files.
//!
//! mailward-send runs as root from cron; job output files may live on
//! filesystems with root squash, so the tail runs with the job owner's
//! effective uid/gid and root is restored immediately afterwards.

use nix::unistd::{setegid, seteuid, Gid, Group, Uid, User};

/// Restores root's effective uid/gid on drop.
pub struct PrivilegeGuard {
    _private: (),
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        if let Err(e) = setegid(Gid::from_raw(0)) {
            tracing::error!("failed to restore effective gid: {}", e);
        }
        if let Err(e) = seteuid(Uid::from_raw(0)) {
            tracing::error!("failed to restore effective uid: {}", e);
        }
    }
}

/// Switch the effective gid/uid to `group`/`user` until the guard drops.
///
/// Returns None (and changes nothing) when not running as root or when the
/// user/group cannot be resolved; the caller proceeds with its own
/// privileges, which is correct for a regular-user test run.
pub fn drop_to_user(user: &str, group: &str) -> Option<PrivilegeGuard> {
    if !Uid::effective().is_root() {
        return None;
    }
    let gid = match Group::from_name(group) {
        Ok(Some(g)) => g.gid,
        _ => {
            tracing::error!("could not resolve group '{}'", group);
            return None;
        }
    };
    let uid = match User::from_name(user) {
        Ok(Some(u)) => u.uid,
        _ => {
            tracing::error!("could not resolve user '{}'", user);
            return None;
        }
    };
    if let Err(e) = setegid(gid) {
        tracing::error!("failed to set effective gid to {}: {}", gid, e);
        return None;
    }
    if let Err(e) = seteuid(uid) {
        tracing::error!("failed to set effective uid to {}: {}", uid, e);
        // gid already changed; the guard restores it
        return Some(PrivilegeGuard { _private: () });
    }
    Some(PrivilegeGuard { _private: () })
}

/// Look up a user's real name from the passwd GECOS field,
/// falling back to the account name.
pub fn user_real_name(user: &str) -> String {
    match User::from_name(user) {
        Ok(Some(entry)) => {
            let gecos = entry.gecos.to_string_lossy();
            let real = gecos.split(',').next().unwrap_or("").trim().to_string();
            if real.is_empty() {
                user.to_string()
            } else {
                real
            }
        }
        _ => user.to_string(),
    }
}
