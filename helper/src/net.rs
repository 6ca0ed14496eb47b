//! Loopback bring-up inside the job's fresh network namespace. No other
//! interfaces, routes, or DNS are provisioned; the job is offline.

use anyhow::{bail, Result};
use std::io;
use std::mem;

pub fn loopback_up() -> Result<()> {
    // the flag ioctls need any datagram socket as a handle
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        bail!("open socket: {}", io::Error::last_os_error());
    }
    let result = set_flags_up(fd);
    unsafe {
        libc::close(fd);
    }
    result
}

fn set_flags_up(fd: libc::c_int) -> Result<()> {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(b"lo\0") {
        *dst = *src as libc::c_char;
    }
    unsafe {
        if libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) < 0 {
            bail!("read lo flags: {}", io::Error::last_os_error());
        }
        ifr.ifr_ifru.ifru_flags |= libc::IFF_UP as libc::c_short;
        if libc::ioctl(fd, libc::SIOCSIFFLAGS, &ifr) < 0 {
            bail!("bring lo up: {}", io::Error::last_os_error());
        }
    }
    Ok(())
}
