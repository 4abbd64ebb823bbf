//! Minimal TraCI client
//!
//! TraCI is SUMO's remote-control protocol: big-endian binary messages over
//! TCP. A message is a `u32` total length followed by commands. Each command
//! is `[len: u8][id: u8][payload]`, or `[0][len: i32][id: u8][payload]` when
//! it does not fit a one-byte length. Every command is answered by a status
//! command and, for queries, a response command carrying the value.
//!
//! Only the commands needed for signal control are implemented.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

use signal_rl_core::{RLError, Result};

/// Command and variable identifiers
pub mod constants {
    /// Query API version
    pub const CMD_GETVERSION: u8 = 0x00;
    /// Advance the simulation
    pub const CMD_SIMSTEP: u8 = 0x02;
    /// Close the connection and end the simulation
    pub const CMD_CLOSE: u8 = 0x7F;

    /// Traffic-light query
    pub const CMD_GET_TL_VARIABLE: u8 = 0xa2;
    /// Traffic-light update
    pub const CMD_SET_TL_VARIABLE: u8 = 0xc2;
    /// Lane query
    pub const CMD_GET_LANE_VARIABLE: u8 = 0xa3;
    /// Vehicle query
    pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xa4;
    /// Offset from a query command to its response command
    pub const RESPONSE_OFFSET: u8 = 0x10;

    /// Identifier list of a domain
    pub const ID_LIST: u8 = 0x00;
    /// Red-yellow-green state string
    pub const TL_RED_YELLOW_GREEN_STATE: u8 = 0x20;
    /// Remaining duration of the current phase
    pub const TL_PHASE_DURATION: u8 = 0x24;
    /// Lanes controlled by a traffic light, one per link
    pub const TL_CONTROLLED_LANES: u8 = 0x26;
    /// Vehicles on a lane in the last step
    pub const LAST_STEP_VEHICLE_ID_LIST: u8 = 0x12;
    /// Lane position of a vehicle
    pub const VAR_LANEPOSITION: u8 = 0x56;
    /// Waiting time
    pub const VAR_WAITING_TIME: u8 = 0x7a;

    /// `i32`
    pub const TYPE_INTEGER: u8 = 0x09;
    /// `f64`
    pub const TYPE_DOUBLE: u8 = 0x0B;
    /// Length-prefixed string
    pub const TYPE_STRING: u8 = 0x0C;
    /// Count-prefixed list of strings
    pub const TYPE_STRINGLIST: u8 = 0x0E;

    /// Status code for success
    pub const RTYPE_OK: u8 = 0x00;
}

use constants::*;

/// Big-endian command payload builder
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Append a byte
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Append an `i32`
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append an `f64`
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append a length-prefixed string
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] for strings longer than `i32::MAX`.
    pub fn string(&mut self, v: &str) -> Result<&mut Self> {
        let len = i32::try_from(v.len())
            .map_err(|_| RLError::Protocol(format!("string of {} bytes is too long", v.len())))?;
        self.i32(len);
        self.buf.extend_from_slice(v.as_bytes());
        Ok(self)
    }

    /// Finish the payload
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Frame one command: `id` followed by `payload`, with its length prefix
///
/// # Errors
/// Returns [`RLError::Protocol`] for payloads too large for TraCI.
pub fn encode_command(id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let short_len = 1 + 1 + payload.len();
    let mut out = Vec::with_capacity(short_len + 4);
    if let Ok(len) = u8::try_from(short_len) {
        out.push(len);
    } else {
        let long_len = i32::try_from(short_len + 4)
            .map_err(|_| RLError::Protocol("command too large".to_string()))?;
        out.push(0);
        out.extend_from_slice(&long_len.to_be_bytes());
    }
    out.push(id);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Query command for variable `var` of `object`
///
/// # Errors
/// Returns [`RLError::Protocol`] when the command cannot be framed.
pub fn encode_get(cmd: u8, var: u8, object: &str) -> Result<Vec<u8>> {
    let mut payload = Encoder::default();
    payload.u8(var).string(object)?;
    encode_command(cmd, &payload.finish())
}

/// Prefix commands with the message length
///
/// # Errors
/// Returns [`RLError::Protocol`] for messages over `u32::MAX` bytes.
pub fn encode_message(commands: &[u8]) -> Result<Vec<u8>> {
    let total = u32::try_from(commands.len() + 4)
        .map_err(|_| RLError::Protocol("message too large".to_string()))?;
    let mut out = Vec::with_capacity(commands.len() + 4);
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(commands);
    Ok(out)
}

/// Cursor over a received message body
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Start reading at the beginning of `buf`
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not read yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(RLError::Protocol(format!(
                "truncated message: wanted {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a byte
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] when the message is exhausted.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read an `i32`
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] when the message is exhausted.
    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    /// Read an `f64`
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] when the message is exhausted.
    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    fn len(&mut self) -> Result<usize> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| RLError::Protocol(format!("negative length {len}")))
    }

    /// Read a length-prefixed UTF-8 string
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] on truncation or invalid UTF-8.
    pub fn string(&mut self) -> Result<String> {
        let len = self.len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RLError::Protocol(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read a count-prefixed list of strings
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] on truncation or invalid UTF-8.
    pub fn string_list(&mut self) -> Result<Vec<String>> {
        let count = self.len()?;
        (0..count).map(|_| self.string()).collect()
    }

    /// Read a command header and return its identifier and the length of
    /// its content after the identifier
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] for malformed headers.
    pub fn command_header(&mut self) -> Result<(u8, usize)> {
        let short = self.u8()?;
        let (header, total) = if short == 0 {
            (5, self.len()?)
        } else {
            (1, usize::from(short))
        };
        let id = self.u8()?;
        let content = total
            .checked_sub(header + 1)
            .ok_or_else(|| RLError::Protocol(format!("command length {total} too short")))?;
        Ok((id, content))
    }

    /// Read the status command answering `expected`
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] when the status belongs to another
    /// command or reports a failure.
    pub fn status(&mut self, expected: u8) -> Result<()> {
        let (id, _) = self.command_header()?;
        let result = self.u8()?;
        let description = self.string()?;
        if id != expected {
            return Err(RLError::Protocol(format!(
                "status for command {id:#04x}, expected {expected:#04x}"
            )));
        }
        if result != RTYPE_OK {
            return Err(RLError::Protocol(format!(
                "command {id:#04x} failed ({result:#04x}): {description}"
            )));
        }
        Ok(())
    }

    /// Read a query response header and return the value type byte
    ///
    /// # Errors
    /// Returns [`RLError::Protocol`] when the response does not answer the
    /// query.
    pub fn response(&mut self, cmd: u8, var: u8, object: &str) -> Result<u8> {
        let (id, _) = self.command_header()?;
        let got_var = self.u8()?;
        let got_object = self.string()?;
        if id != cmd.wrapping_add(RESPONSE_OFFSET) || got_var != var || got_object != object {
            return Err(RLError::Protocol(format!(
                "unexpected response {id:#04x}/{got_var:#04x} for '{got_object}', \
                 wanted {cmd:#04x}/{var:#04x} for '{object}'"
            )));
        }
        self.u8()
    }
}

fn expect_type(got: u8, want: u8) -> Result<()> {
    if got == want {
        Ok(())
    } else {
        Err(RLError::Protocol(format!(
            "value type {got:#04x}, expected {want:#04x}"
        )))
    }
}

/// TraCI connection over any byte stream
#[derive(Debug)]
pub struct TraciClient<T> {
    stream: T,
}

impl TraciClient<TcpStream> {
    /// Connect to a SUMO instance, retrying while it starts up
    ///
    /// # Errors
    /// Returns [`RLError::Simulator`] when every attempt fails.
    pub async fn connect<A: ToSocketAddrs + Clone>(
        addr: A,
        retries: u32,
        delay: std::time::Duration,
    ) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match TcpStream::connect(addr.clone()).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(attempt, "connected to TraCI server");
                    return Ok(Self::new(stream));
                }
                Err(e) if attempt < retries => {
                    trace!(attempt, error = %e, "TraCI server not ready");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(RLError::Simulator(format!(
                        "could not connect to TraCI server after {} attempts: {e}",
                        attempt + 1
                    )));
                }
            }
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TraciClient<T> {
    /// Wrap an established stream
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Send one framed command and return the reply body
    async fn exchange(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let message = encode_message(command)?;
        self.stream.write_all(&message).await?;
        self.stream.flush().await?;

        let total = self.stream.read_u32().await?;
        let body_len = usize::try_from(total)
            .ok()
            .and_then(|t| t.checked_sub(4))
            .ok_or_else(|| RLError::Protocol(format!("message length {total} too short")))?;
        let mut body = vec![0_u8; body_len];
        self.stream.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn get(&mut self, cmd: u8, var: u8, object: &str, value_type: u8) -> Result<Vec<u8>> {
        let body = self.exchange(&encode_get(cmd, var, object)?).await?;
        let mut decoder = Decoder::new(&body);
        decoder.status(cmd)?;
        expect_type(decoder.response(cmd, var, object)?, value_type)?;
        Ok(body[body.len() - decoder.remaining()..].to_vec())
    }

    async fn get_double(&mut self, cmd: u8, var: u8, object: &str) -> Result<f64> {
        let value = self.get(cmd, var, object, TYPE_DOUBLE).await?;
        Decoder::new(&value).f64()
    }

    async fn get_string_list(&mut self, cmd: u8, var: u8, object: &str) -> Result<Vec<String>> {
        let value = self.get(cmd, var, object, TYPE_STRINGLIST).await?;
        Decoder::new(&value).string_list()
    }

    async fn set(&mut self, cmd: u8, var: u8, object: &str, value: &[u8]) -> Result<()> {
        let mut payload = Encoder::default();
        payload.u8(var).string(object)?;
        let mut payload = payload.finish();
        payload.extend_from_slice(value);

        let body = self.exchange(&encode_command(cmd, &payload)?).await?;
        Decoder::new(&body).status(cmd)
    }

    /// API version and SUMO identifier string
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn version(&mut self) -> Result<(i32, String)> {
        let body = self.exchange(&encode_command(CMD_GETVERSION, &[])?).await?;
        let mut decoder = Decoder::new(&body);
        decoder.status(CMD_GETVERSION)?;
        let (id, _) = decoder.command_header()?;
        if id != CMD_GETVERSION {
            return Err(RLError::Protocol(format!("unexpected version response {id:#04x}")));
        }
        Ok((decoder.i32()?, decoder.string()?))
    }

    /// Advance the simulation by one step
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn simulation_step(&mut self) -> Result<()> {
        let mut payload = Encoder::default();
        payload.f64(0.0);
        let body = self
            .exchange(&encode_command(CMD_SIMSTEP, &payload.finish())?)
            .await?;
        let mut decoder = Decoder::new(&body);
        decoder.status(CMD_SIMSTEP)?;
        let subscriptions = decoder.i32()?;
        if subscriptions != 0 {
            trace!(subscriptions, "ignoring subscription results");
        }
        Ok(())
    }

    /// End the simulation and the connection
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn close(&mut self) -> Result<()> {
        let body = self.exchange(&encode_command(CMD_CLOSE, &[])?).await?;
        Decoder::new(&body).status(CMD_CLOSE)?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// All traffic-light identifiers
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn traffic_light_ids(&mut self) -> Result<Vec<String>> {
        self.get_string_list(CMD_GET_TL_VARIABLE, ID_LIST, "").await
    }

    /// Lanes controlled by a traffic light, one entry per link
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn controlled_lanes(&mut self, tl: &str) -> Result<Vec<String>> {
        self.get_string_list(CMD_GET_TL_VARIABLE, TL_CONTROLLED_LANES, tl)
            .await
    }

    /// Vehicles on a lane during the last step
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn lane_vehicle_ids(&mut self, lane: &str) -> Result<Vec<String>> {
        self.get_string_list(CMD_GET_LANE_VARIABLE, LAST_STEP_VEHICLE_ID_LIST, lane)
            .await
    }

    /// Summed waiting time of the vehicles on a lane, in seconds
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn lane_waiting_time(&mut self, lane: &str) -> Result<f64> {
        self.get_double(CMD_GET_LANE_VARIABLE, VAR_WAITING_TIME, lane)
            .await
    }

    /// Distance a vehicle has travelled along its lane, in metres
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn vehicle_lane_position(&mut self, vehicle: &str) -> Result<f64> {
        self.get_double(CMD_GET_VEHICLE_VARIABLE, VAR_LANEPOSITION, vehicle)
            .await
    }

    /// Set a traffic light's red-yellow-green state
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn set_red_yellow_green_state(&mut self, tl: &str, state: &str) -> Result<()> {
        let mut value = Encoder::default();
        value.u8(TYPE_STRING).string(state)?;
        self.set(CMD_SET_TL_VARIABLE, TL_RED_YELLOW_GREEN_STATE, tl, &value.finish())
            .await
    }

    /// Set the remaining duration of a traffic light's current phase
    ///
    /// # Errors
    /// Returns an error on I/O or protocol failure.
    pub async fn set_phase_duration(&mut self, tl: &str, seconds: f64) -> Result<()> {
        let mut value = Encoder::default();
        value.u8(TYPE_DOUBLE).f64(seconds);
        self.set(CMD_SET_TL_VARIABLE, TL_PHASE_DURATION, tl, &value.finish())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn status(cmd: u8, result: u8, description: &str) -> Vec<u8> {
        let mut payload = Encoder::default();
        payload.u8(result).string(description).unwrap();
        encode_command(cmd, &payload.finish()).unwrap()
    }

    fn response(cmd: u8, var: u8, object: &str, value: &[u8]) -> Vec<u8> {
        let mut payload = Encoder::default();
        payload.u8(var).string(object).unwrap();
        let mut payload = payload.finish();
        payload.extend_from_slice(value);
        encode_command(cmd + RESPONSE_OFFSET, &payload).unwrap()
    }

    fn string_list(items: &[&str]) -> Vec<u8> {
        let mut value = Encoder::default();
        value.u8(TYPE_STRINGLIST).i32(i32::try_from(items.len()).unwrap());
        for item in items {
            value.string(item).unwrap();
        }
        value.finish()
    }

    /// Serve canned replies, one per request, and hand back the requests
    fn serve(replies: Vec<Vec<u8>>) -> (TraciClient<DuplexStream>, tokio::task::JoinHandle<Vec<Vec<u8>>>) {
        let (client, mut server) = duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for reply in replies {
                let total = server.read_u32().await.unwrap() as usize;
                let mut body = vec![0; total - 4];
                server.read_exact(&mut body).await.unwrap();
                requests.push(body);
                server.write_all(&encode_message(&reply).unwrap()).await.unwrap();
            }
            requests
        });
        (TraciClient::new(client), handle)
    }

    #[test]
    fn short_and_long_commands_are_framed() {
        let short = encode_command(CMD_CLOSE, &[]).unwrap();
        assert_eq!(short, vec![2, CMD_CLOSE]);

        let payload = vec![7_u8; 300];
        let long = encode_command(CMD_SET_TL_VARIABLE, &payload).unwrap();
        assert_eq!(long[0], 0);
        assert_eq!(i32::from_be_bytes([long[1], long[2], long[3], long[4]]), 306);
        assert_eq!(long[5], CMD_SET_TL_VARIABLE);
        assert_eq!(long.len(), 306);

        let mut decoder = Decoder::new(&long);
        assert_eq!(decoder.command_header().unwrap(), (CMD_SET_TL_VARIABLE, 300));
    }

    #[test]
    fn get_command_layout() {
        let cmd = encode_get(CMD_GET_LANE_VARIABLE, VAR_WAITING_TIME, "e1_0").unwrap();
        assert_eq!(
            cmd,
            vec![11, 0xa3, 0x7a, 0, 0, 0, 4, b'e', b'1', b'_', b'0']
        );
    }

    #[test]
    fn truncated_bodies_are_protocol_errors() {
        let mut decoder = Decoder::new(&[0, 0, 0, 9, b'a']);
        assert!(matches!(decoder.string(), Err(RLError::Protocol(_))));
    }

    #[test]
    fn failed_status_carries_the_description() {
        let body = status(CMD_GET_TL_VARIABLE, 0xff, "Traffic light 'x' is not known");
        let err = Decoder::new(&body).status(CMD_GET_TL_VARIABLE).unwrap_err();
        assert!(err.to_string().contains("is not known"));
    }

    #[tokio::test]
    async fn string_list_query_round_trip() {
        let mut reply = status(CMD_GET_TL_VARIABLE, RTYPE_OK, "");
        reply.extend(response(
            CMD_GET_TL_VARIABLE,
            TL_CONTROLLED_LANES,
            "gneJ2",
            &string_list(&["n_0", "n_0", "e_0"]),
        ));
        let (mut client, server) = serve(vec![reply]);

        let lanes = client.controlled_lanes("gneJ2").await.unwrap();
        assert_eq!(lanes, vec!["n_0", "n_0", "e_0"]);

        let requests = server.await.unwrap();
        assert_eq!(
            requests[0],
            encode_get(CMD_GET_TL_VARIABLE, TL_CONTROLLED_LANES, "gneJ2").unwrap()
        );
    }

    #[tokio::test]
    async fn double_query_and_step() {
        let mut waiting = status(CMD_GET_LANE_VARIABLE, RTYPE_OK, "");
        let mut value = Encoder::default();
        value.u8(TYPE_DOUBLE).f64(12.5);
        waiting.extend(response(CMD_GET_LANE_VARIABLE, VAR_WAITING_TIME, "n_0", &value.finish()));

        let mut step = status(CMD_SIMSTEP, RTYPE_OK, "");
        step.extend_from_slice(&0_i32.to_be_bytes());

        let (mut client, server) = serve(vec![waiting, step]);
        assert!((client.lane_waiting_time("n_0").await.unwrap() - 12.5).abs() < f64::EPSILON);
        client.simulation_step().await.unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests[1][..2], [10, CMD_SIMSTEP]);
    }

    #[tokio::test]
    async fn wrong_value_type_is_rejected() {
        let mut reply = status(CMD_GET_VEHICLE_VARIABLE, RTYPE_OK, "");
        let mut value = Encoder::default();
        value.u8(TYPE_INTEGER).i32(3);
        reply.extend(response(CMD_GET_VEHICLE_VARIABLE, VAR_LANEPOSITION, "veh0", &value.finish()));
        let (mut client, _server) = serve(vec![reply]);

        assert!(matches!(
            client.vehicle_lane_position("veh0").await,
            Err(RLError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn set_state_sends_typed_string() {
        let (mut client, server) = serve(vec![status(CMD_SET_TL_VARIABLE, RTYPE_OK, "")]);
        client
            .set_red_yellow_green_state("J0", "GGGrrrrrrrrr")
            .await
            .unwrap();

        let requests = server.await.unwrap();
        let mut decoder = Decoder::new(&requests[0]);
        assert_eq!(decoder.command_header().unwrap().0, CMD_SET_TL_VARIABLE);
        assert_eq!(decoder.u8().unwrap(), TL_RED_YELLOW_GREEN_STATE);
        assert_eq!(decoder.string().unwrap(), "J0");
        assert_eq!(decoder.u8().unwrap(), TYPE_STRING);
        assert_eq!(decoder.string().unwrap(), "GGGrrrrrrrrr");
        assert_eq!(decoder.remaining(), 0);
    }
}
