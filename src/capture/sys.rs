//! Raw V4L2 streaming ioctls not covered by the `v4l` crate's safe API.
//!
//! Layouts mirror `linux/videodev2.h` for the mmap streaming path only.

#![allow(non_camel_case_types)]

use std::os::unix::io::RawFd;

use libc::{c_int, c_ulong, c_void, timeval};
use nix::errno::Errno;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const V4L2_MEMORY_MMAP: u32 = 1;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub planes: *mut c_void,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

impl v4l2_buffer {
    /// An mmap capture buffer descriptor for `index`, all other fields zeroed.
    pub fn mmap_capture(index: u32) -> Self {
        Self {
            index,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            bytesused: 0,
            flags: 0,
            field: 0,
            timestamp: timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            timecode: v4l2_timecode::default(),
            sequence: 0,
            memory: V4L2_MEMORY_MMAP,
            m: v4l2_buffer_m { userptr: 0 },
            length: 0,
            reserved2: 0,
            request_fd: 0,
        }
    }

    pub fn offset(&self) -> u32 {
        // SAFETY: the driver fills `m.offset` for V4L2_MEMORY_MMAP buffers.
        unsafe { self.m.offset }
    }
}

nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);

/// Retry `op` while the call is interrupted by a signal.
fn retry<F>(mut op: F) -> Result<(), Errno>
where
    F: FnMut() -> nix::Result<c_int>,
{
    loop {
        match op() {
            Err(Errno::EINTR) => continue,
            other => return other.map(drop),
        }
    }
}

pub fn request_buffers(fd: RawFd, count: u32) -> Result<u32, Errno> {
    let mut req = v4l2_requestbuffers {
        count,
        type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
        memory: V4L2_MEMORY_MMAP,
        ..Default::default()
    };
    // SAFETY: `req` is a valid, initialized v4l2_requestbuffers for the call.
    retry(|| unsafe { vidioc_reqbufs(fd, &mut req) })?;
    Ok(req.count)
}

pub fn query_buffer(fd: RawFd, index: u32) -> Result<v4l2_buffer, Errno> {
    let mut buf = v4l2_buffer::mmap_capture(index);
    // SAFETY: `buf` is a valid, initialized v4l2_buffer for the call.
    retry(|| unsafe { vidioc_querybuf(fd, &mut buf) })?;
    Ok(buf)
}

pub fn queue_buffer(fd: RawFd, index: u32) -> Result<(), Errno> {
    let mut buf = v4l2_buffer::mmap_capture(index);
    // SAFETY: as above.
    retry(|| unsafe { vidioc_qbuf(fd, &mut buf) })
}

/// Dequeue a filled buffer. `Ok(None)` when the device has nothing ready.
pub fn dequeue_buffer(fd: RawFd) -> Result<Option<v4l2_buffer>, Errno> {
    let mut buf = v4l2_buffer::mmap_capture(0);
    // SAFETY: as above.
    match retry(|| unsafe { vidioc_dqbuf(fd, &mut buf) }) {
        Ok(()) => Ok(Some(buf)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn stream_on(fd: RawFd) -> Result<(), Errno> {
    let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
    // SAFETY: the ioctl only reads the buffer type.
    retry(|| unsafe { vidioc_streamon(fd, &kind) })
}

pub fn stream_off(fd: RawFd) -> Result<(), Errno> {
    let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
    // SAFETY: as above.
    retry(|| unsafe { vidioc_streamoff(fd, &kind) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_the_kernel_abi() {
        assert_eq!(std::mem::size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(std::mem::size_of::<v4l2_timecode>(), 16);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<v4l2_buffer>(), 88);
    }
}
