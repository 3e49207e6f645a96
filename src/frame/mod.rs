//! Frame codec for the session stream.
//!
//! Wire layout of a frame:
//!
//! ```text
//! offset 0  : length    (2 bytes, big-endian, ciphertext length)
//! offset 2  : command   (1 byte)
//! offset 3  : nonce     (12 bytes)
//! offset 15 : payload   (`length` bytes, ciphertext || 16-byte tag)
//! ```
//!
//! The AEAD additional data is the 3-byte header (`length BE || command`),
//! reconstructed from the received bytes on decode. A header flipped or
//! swapped between frames therefore fails authentication.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::{
    AEAD_NONCE_SIZE, AEAD_TAG_SIZE, FRAME_HEADER_SIZE, FRAME_OVERHEAD, FrameError,
    MAX_FRAME_PLAINTEXT,
};
use crate::crypto::{SecureRandom, SessionKey, aead_open, aead_seal};

/// Command tag carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCommand {
    /// Tunnelled application data.
    Data,
    /// Padding parameter adjustment (opaque in v1).
    PaddingCtrl,
    /// Timing parameter adjustment (opaque in v1).
    TimingCtrl,
    /// Graceful session termination.
    Close,
    /// A command byte this version does not know.
    Unknown(u8),
}

impl FrameCommand {
    /// Decode a command byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Data,
            0x02 => Self::PaddingCtrl,
            0x03 => Self::TimingCtrl,
            0x04 => Self::Close,
            other => Self::Unknown(other),
        }
    }

    /// Encode to the wire byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Data => 0x01,
            Self::PaddingCtrl => 0x02,
            Self::TimingCtrl => 0x03,
            Self::Close => 0x04,
            Self::Unknown(other) => other,
        }
    }
}

/// A sealed frame as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command tag.
    pub command: FrameCommand,
    /// Per-frame nonce, unique under one session key.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// Ciphertext including the 16-byte tag.
    pub payload: Vec<u8>,
}

/// Build the additional data for a frame: `length (2 BE) || command`.
fn construct_ad(length: u16, command: u8) -> [u8; FRAME_HEADER_SIZE] {
    let len = length.to_be_bytes();
    [len[0], len[1], command]
}

impl Frame {
    /// Seal `plaintext` into a frame under the session key.
    ///
    /// # Arguments
    /// * `key` - Session key
    /// * `rng` - Nonce source
    /// * `command` - Command tag, bound into the additional data
    /// * `plaintext` - At most [`MAX_FRAME_PLAINTEXT`] bytes
    pub fn seal(
        key: &SessionKey,
        rng: &dyn SecureRandom,
        command: FrameCommand,
        plaintext: &[u8],
    ) -> Result<Self, FrameError> {
        if plaintext.len() > MAX_FRAME_PLAINTEXT {
            return Err(FrameError::FrameTooLarge { length: plaintext.len() });
        }

        let nonce = rng.random_nonce();
        let length = (plaintext.len() + AEAD_TAG_SIZE) as u16;
        let ad = construct_ad(length, command.as_byte());
        let payload = aead_seal(key, &nonce, plaintext, &ad)?;

        Ok(Self { command, nonce, payload })
    }

    /// Open the frame, verifying the header binding.
    pub fn open(&self, key: &SessionKey) -> Result<Vec<u8>, FrameError> {
        let ad = construct_ad(self.payload.len() as u16, self.command.as_byte());
        Ok(aead_open(key, &self.nonce, &self.payload, &ad)?)
    }

    /// Serialize the frame to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.push(self.command.as_byte());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one frame from `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. Fails with
    /// [`FrameError::FrameTooShort`] if `buf` does not hold a complete
    /// frame yet.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(FrameError::FrameTooShort);
        }

        let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if length < AEAD_TAG_SIZE {
            return Err(FrameError::FrameTooShort);
        }

        let total = FRAME_OVERHEAD + length;
        if buf.len() < total {
            return Err(FrameError::FrameTooShort);
        }

        let command = FrameCommand::from_byte(buf[2]);
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce.copy_from_slice(&buf[FRAME_HEADER_SIZE..FRAME_OVERHEAD]);
        let payload = buf[FRAME_OVERHEAD..total].to_vec();

        Ok((Self { command, nonce, payload }, total))
    }
}

/// Read one frame from an async stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; FRAME_OVERHEAD];
    reader.read_exact(&mut head).await?;

    let length = u16::from_be_bytes([head[0], head[1]]) as usize;
    if length < AEAD_TAG_SIZE {
        return Err(FrameError::FrameTooShort);
    }

    let command = FrameCommand::from_byte(head[2]);
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(&head[FRAME_HEADER_SIZE..]);

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame { command, nonce, payload })
}

/// Write one frame to an async stream.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}
