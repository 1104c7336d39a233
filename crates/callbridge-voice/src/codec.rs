//! Conversion between the telephony wire encoding and engine audio.
//!
//! The transport carries 8 kHz G.711 μ-law audio, base64-encoded inside JSON
//! control messages. Inbound frames are decoded to raw bytes for the
//! recognizer; synthesized clips (already μ-law) are base64-encoded and cut
//! into transport-sized frames on the way out. Nothing here holds state.

use crate::config::AudioEncoding;
use crate::error::VoiceError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Telephony sample rate in Hz.
pub const SAMPLE_RATE_HZ: u32 = 8_000;

/// Largest base64 payload, in characters, the transport accepts per media frame.
pub const DEFAULT_FRAME_CHARS: usize = 214;

/// Decodes one inbound media payload into raw μ-law bytes.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, VoiceError> {
    STANDARD
        .decode(payload.trim())
        .map_err(|e| VoiceError::Codec(format!("invalid base64 media payload: {}", e)))
}

/// Encodes a raw clip for the transport's control channel.
pub fn encode_payload(audio: &[u8]) -> String {
    STANDARD.encode(audio)
}

/// Splits an encoded payload into consecutive frames of at most `frame_chars`
/// characters. The last frame carries the remainder.
///
/// Base64 output is ASCII, so slicing on character counts never splits a
/// code point. A zero budget is treated as one character per frame.
pub fn frame_payload(encoded: &str, frame_chars: usize) -> Vec<&str> {
    let frame_chars = frame_chars.max(1);
    encoded
        .as_bytes()
        .chunks(frame_chars)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect()
}

/// Converts inbound wire audio to the layout the recognizer was opened with.
pub fn to_recognizer_audio(mulaw: Vec<u8>, encoding: AudioEncoding) -> Vec<u8> {
    match encoding {
        AudioEncoding::Mulaw => mulaw,
        AudioEncoding::Linear16 => ulaw_to_linear16_le(&mulaw),
    }
}

/// μ-law compression per ITU-T G.711.
pub fn ulaw_compress(sample: i16) -> u8 {
    let absno = if sample < 0 {
        (((!sample) as u16) >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let absno = absno.min(0x1FFF);

    let mut i = absno >> 6;
    let mut segno = 1;
    while i != 0 {
        segno += 1;
        i >>= 1;
    }

    let high_nibble = 0x0008 - segno;
    let low_nibble = 0x000F - ((absno >> segno) & 0x000F);
    let mut result = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        result |= 0x0080;
    }
    result as u8
}

/// μ-law expansion per ITU-T G.711.
pub fn ulaw_expand(compressed: u8) -> i16 {
    let sign: i32 = if compressed < 0x80 { -1 } else { 1 };
    let mantissa = (!compressed) as i32;
    let exponent = (mantissa >> 4) & 0x07;
    let segment = exponent + 1;
    let mantissa = mantissa & 0x0F;
    let step = 4 << segment;

    (sign * ((0x80 << exponent) + step * mantissa + step / 2 - 4 * 33)) as i16
}

/// Expands μ-law bytes into 16-bit little-endian PCM bytes.
pub fn ulaw_to_linear16_le(mulaw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        out.extend_from_slice(&ulaw_expand(byte).to_le_bytes());
    }
    out
}

/// Compresses 16-bit little-endian PCM bytes into μ-law. A trailing odd byte
/// is dropped.
pub fn linear16_le_to_ulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| ulaw_compress(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}
