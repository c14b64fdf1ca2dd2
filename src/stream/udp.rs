/*
 * Copyright (C) 2021 Evtech Solutions, Ltd., dba 3D-P
 * Copyright (C) 2021 Neil Tallim <neiltallim@3d-p.com>
 *
 * This file is part of rpacer.
 *
 * rpacer is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * rpacer is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with rpacer.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{stream::Stream, Result};

/// opens a non-blocking UDP socket connected to the stream's destination
///
/// `send_buffer` is a request in bytes (0 keeps the kernel default); the size the
/// kernel actually granted is returned alongside the socket.
pub fn connect(stream: &Stream, send_buffer: usize) -> Result<(UdpSocket, usize)> {
    log::trace!("preparing to connect UDP stream {} to {}...", stream.id, stream.destination);
    let socket = Socket::new(Domain::for_address(stream.destination), Type::DGRAM, Some(Protocol::UDP))?;
    socket.connect(&stream.destination.into())?;
    socket.set_nonblocking(true)?;

    if send_buffer != 0 {
        log::trace!("setting send-buffer of stream {} to {}...", stream.id, send_buffer);
        socket.set_send_buffer_size(send_buffer)?;
    }
    let granted = socket.send_buffer_size()?;
    log::trace!("connected UDP stream {} to {}", stream.id, stream.destination);

    Ok((socket.into(), granted))
}

/// opens a non-blocking UDP socket bound to `addr`, for receiving
///
/// Returns the socket and the receive-buffer size the kernel granted.
pub fn bind(addr: SocketAddr, receive_buffer: usize) -> Result<(UdpSocket, usize)> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if receive_buffer != 0 {
        log::trace!("setting receive-buffer for {} to {}...", addr, receive_buffer);
        socket.set_recv_buffer_size(receive_buffer)?;
    }
    let granted = socket.recv_buffer_size()?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    log::trace!("bound UDP socket to {}", addr);

    Ok((socket.into(), granted))
}
