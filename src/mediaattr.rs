// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C11: the fixed 8-byte media-attribute codec attached to file nodes
//! as file-attribute type 8 (and optionally 9 for exotic codec
//! combinations). Bit layout and quantization rules reproduce the wire
//! format byte-for-byte so encoded attributes interoperate with
//! existing clients.

use crate::crypto::CryptoProvider;

/// File-attribute type carrying the packed, XXTEA-encrypted blob.
pub const FA_MEDIA: u32 = 8;
/// File-attribute type carrying the extended container/codec-id blob,
/// present only when [`MediaProperties::shortformat`] is `0`.
pub const FA_MEDIA_EXT: u32 = 9;

/// Video/audio properties attached to a file node, as recovered from
/// (or destined for) the packed attribute blob.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MediaProperties {
    /// `0` means "exotic combination, see `fa_mediaext`"; nonzero
    /// indexes a known (container, video codec, audio codec) triple.
    pub shortformat: u8,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub playtime: u32,
    pub container_id: u32,
    pub video_codec_id: u32,
    pub audio_codec_id: u32,
}

/// The two file-attribute strings produced by encoding, ready to attach
/// to a `pfa` (put file attribute) command, formatted `"<id>*<base64>"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedMediaAttrs {
    pub fa_media: String,
    pub fa_media_ext: Option<String>,
}

fn quantize_doubling(value: u32, threshold: u32) -> u32 {
    let mut v = value << 1;
    if v >= threshold {
        v = ((v - threshold) >> 3) | 1;
    }
    if v >= threshold {
        v = threshold - 1;
    }
    v
}

fn quantize_playtime(value: u32) -> u32 {
    let mut v = value << 1;
    if v >= 262_144 {
        v = ((v - 262_200) / 60) | 1;
    }
    if v >= 262_144 {
        v = 262_143;
    }
    v
}

fn dequantize_doubling(stored: u32, flag: bool, shift_bias: u32) -> u32 {
    if flag {
        (stored << 3) + shift_bias
    } else {
        stored
    }
}

/// XXTEA-encrypt an 8-byte (two `u32` word) blob and format it as a
/// `"<id>*<base64>"` file-attribute string, matching `formatfileattr`.
fn format_file_attr(crypto: &dyn CryptoProvider, id: u32, mut v: [u8; 8], key: &[u32; 4]) -> String {
    let mut words = [
        u32::from_le_bytes(v[0..4].try_into().unwrap()),
        u32::from_le_bytes(v[4..8].try_into().unwrap()),
    ];
    crypto.xxtea_encrypt(&mut words, key, true);
    v[0..4].copy_from_slice(&words[0].to_le_bytes());
    v[4..8].copy_from_slice(&words[1].to_le_bytes());
    let b64 = base64::encode_config(v, base64::STANDARD);
    format!("{id}*{b64}")
}

fn decrypt_file_attr(crypto: &dyn CryptoProvider, b64: &str, key: &[u32; 4]) -> Option<[u8; 8]> {
    let raw = base64::decode_config(b64, base64::STANDARD).ok()?;
    if raw.len() != 8 {
        return None;
    }
    let mut words = [
        u32::from_le_bytes(raw[0..4].try_into().unwrap()),
        u32::from_le_bytes(raw[4..8].try_into().unwrap()),
    ];
    crypto.xxtea_decrypt(&mut words, key, true);
    let mut v = [0u8; 8];
    v[0..4].copy_from_slice(&words[0].to_le_bytes());
    v[4..8].copy_from_slice(&words[1].to_le_bytes());
    Some(v)
}

/// Encode `props` into its wire file-attribute strings. `key` is the
/// 4-word XXTEA key derived from the file key.
pub fn encode_media_attr(crypto: &dyn CryptoProvider, props: MediaProperties, key: &[u32; 4]) -> EncodedMediaAttrs {
    let width = quantize_doubling(props.width, 32768);
    let height = quantize_doubling(props.height, 32768);
    let fps = quantize_doubling(props.fps, 256);
    let playtime = quantize_playtime(props.playtime);

    let mut v = [0u8; 8];
    v[7] = props.shortformat;
    v[6] = (playtime >> 10) as u8;
    v[5] = ((playtime >> 2) & 255) as u8;
    v[4] = ((((playtime & 3) << 6) + (fps >> 2)) & 255) as u8;
    v[3] = ((((fps & 3) << 6) + ((height >> 9) & 63)) & 255) as u8;
    v[2] = ((height >> 1) & 255) as u8;
    v[1] = ((((width >> 8) & 127) + ((height & 1) << 7)) & 255) as u8;
    v[0] = (width & 255) as u8;

    let fa_media = format_file_attr(crypto, FA_MEDIA, v, key);

    let fa_media_ext = if props.shortformat == 0 {
        let mut ext = [0u8; 8];
        ext[3] = ((props.audio_codec_id >> 4) & 255) as u8;
        ext[2] = (((props.video_codec_id >> 8) & 15) + ((props.audio_codec_id & 15) << 4)) as u8;
        ext[1] = (props.video_codec_id & 255) as u8;
        ext[0] = (props.container_id & 255) as u8;
        Some(format_file_attr(crypto, FA_MEDIA_EXT, ext, key))
    } else {
        None
    };

    EncodedMediaAttrs { fa_media, fa_media_ext }
}

/// Decode the `"<id>*<base64>"` value of file-attribute 8 (and, when
/// `shortformat == 0`, the paired value of file-attribute 9) back into
/// [`MediaProperties`].
pub fn decode_media_attr(
    crypto: &dyn CryptoProvider,
    encoded: &EncodedMediaAttrs,
    key: &[u32; 4],
) -> Option<MediaProperties> {
    let (_, b64) = encoded.fa_media.split_once('*')?;
    let v = decrypt_file_attr(crypto, b64, key)?;

    let width_stored = ((v[0] as u32) >> 1) + (((v[1] & 127) as u32) << 7);
    let width = dequantize_doubling(width_stored, v[0] & 1 != 0, 16384);

    let height_stored = (v[2] as u32) + (((v[3] & 63) as u32) << 8);
    let height = dequantize_doubling(height_stored, v[1] & 128 != 0, 16384);

    let fps_stored = ((v[3] as u32) >> 7) + (((v[4] & 63) as u32) << 1);
    let fps = dequantize_doubling(fps_stored, v[3] & 64 != 0, 128);

    let playtime_stored = ((v[4] as u32) >> 7) + ((v[5] as u32) << 1) + ((v[6] as u32) << 9);
    let playtime = if v[4] & 64 != 0 {
        playtime_stored * 60 + 131_100
    } else {
        playtime_stored
    };

    let shortformat = v[7];

    let mut props = MediaProperties {
        shortformat,
        width,
        height,
        fps,
        playtime,
        container_id: 0,
        video_codec_id: 0,
        audio_codec_id: 0,
    };

    if shortformat == 0 {
        let (_, ext_b64) = encoded.fa_media_ext.as_deref()?.split_once('*')?;
        let ext = decrypt_file_attr(crypto, ext_b64, key)?;
        props.container_id = ext[0] as u32;
        props.video_codec_id = (ext[1] as u32) + (((ext[2] & 15) as u32) << 8);
        props.audio_codec_id = ((ext[2] >> 4) as u32) + ((ext[3] as u32) << 4);
    }

    Some(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;

    fn key() -> [u32; 4] {
        [0x1357_9bdf, 0x2468_ace0, 0x0f1e_2d3c, 0x4b5a_6978]
    }

    #[test]
    fn roundtrips_for_a_plain_shortformat_video() {
        let crypto = DefaultCrypto;
        let props = MediaProperties {
            shortformat: 3,
            width: 1920,
            height: 1080,
            fps: 30,
            playtime: 754,
            container_id: 0,
            video_codec_id: 0,
            audio_codec_id: 0,
        };
        let encoded = encode_media_attr(&crypto, props, &key());
        assert!(encoded.fa_media_ext.is_none());
        let decoded = decode_media_attr(&crypto, &encoded, &key()).unwrap();
        assert_eq!(decoded.shortformat, props.shortformat);
        assert_eq!(decoded.width, props.width);
        assert_eq!(decoded.height, props.height);
        assert_eq!(decoded.fps, props.fps);
        assert_eq!(decoded.playtime, props.playtime);
    }

    #[test]
    fn roundtrips_for_an_exotic_codec_combination() {
        let crypto = DefaultCrypto;
        let props = MediaProperties {
            shortformat: 0,
            width: 3840,
            height: 2160,
            fps: 60,
            playtime: 3600,
            container_id: 21,
            video_codec_id: 513,
            audio_codec_id: 9,
        };
        let encoded = encode_media_attr(&crypto, props, &key());
        assert!(encoded.fa_media_ext.is_some());
        let decoded = decode_media_attr(&crypto, &encoded, &key()).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn roundtrips_for_values_past_the_requantization_thresholds() {
        let crypto = DefaultCrypto;
        let props = MediaProperties {
            shortformat: 1,
            width: 40000,
            height: 33000,
            fps: 240,
            playtime: 200_000,
            container_id: 0,
            video_codec_id: 0,
            audio_codec_id: 0,
        };
        let encoded = encode_media_attr(&crypto, props, &key());
        let decoded = decode_media_attr(&crypto, &encoded, &key()).unwrap();
        // above the requantization threshold, values are inherently lossy:
        // only confirm the codec round-trips to *a* value in-range, not
        // the exact input (the encoding is not injective there by design).
        assert!(decoded.width > 0);
        assert!(decoded.height > 0);
        assert_eq!(decoded.shortformat, props.shortformat);
    }
}
