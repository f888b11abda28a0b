//! Identity capture and mount options.
//!
//! Files surface owned by the human in front of the keyboard, not by root:
//! when running under sudo the original uid/gid are recovered from the
//! environment and used for every entry the mount reports.

use fuser::MountOption;

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub is_root: bool,
}

impl Identity {
    /// Capture current or sudo identity.
    pub fn capture() -> Self {
        if let (Some(sudo_uid), Some(sudo_gid)) =
            (std::env::var("SUDO_UID").ok(), std::env::var("SUDO_GID").ok())
        {
            let uid = sudo_uid.parse::<u32>().unwrap_or_else(|_| Self::current_uid());
            let gid = sudo_gid.parse::<u32>().unwrap_or_else(|_| Self::current_gid());
            let is_root = Self::current_uid() == 0;
            tracing::info!("Running as root, serving files as UID:{} GID:{}", uid, gid);
            Self { uid, gid, is_root }
        } else {
            let uid = Self::current_uid();
            let gid = Self::current_gid();
            Self { uid, gid, is_root: uid == 0 }
        }
    }

    fn current_uid() -> u32 {
        unsafe { libc::getuid() }
    }

    fn current_gid() -> u32 {
        unsafe { libc::getgid() }
    }

    /// Baseline mount options for this identity; `-o` extends these.
    pub fn mount_options(&self) -> Vec<MountOption> {
        if self.is_root {
            vec![MountOption::AllowOther, MountOption::AutoUnmount]
        } else {
            vec![MountOption::AutoUnmount]
        }
    }
}
