use skywave_core::dsp::wav::encode_wav_pcm16;

#[test]
fn hound_parses_the_encoded_header() {
    let tone: Vec<f32> = (0..24_000)
        .map(|n| (2.0 * std::f32::consts::PI * 1000.0 * n as f32 / 8000.0).sin() * 0.5)
        .collect();
    let wav = encode_wav_pcm16(&tone, 8000);

    let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(reader.len(), 24_000);
}

#[test]
fn samples_round_trip_through_pcm16() {
    let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
    let wav = encode_wav_pcm16(&samples, 8000);
    let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
    let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(decoded, vec![0, 16384, -16384, 32767, -32767]);
}
