use rust_dialogsum::pipelines::generation::{BeamSearch, GenerateConfig};
use rust_dialogsum::pipelines::seq2seq::{Seq2SeqModel, Seq2SeqModelResources};
use rust_dialogsum::pipelines::summarization::decode_summaries;
use tch::{Device, Tensor};

#[test]
#[cfg_attr(not(feature = "all-tests"), ignore)]
fn bart_large_forward_pass() -> anyhow::Result<()> {
    //    Resources paths
    let resources = Seq2SeqModelResources::from_hub("facebook/bart-large");
    let model = Seq2SeqModel::new(&resources, Device::Cpu)?;
    let tokenizer = resources.tokenizer(model.model_type())?;

    //    Define input
    let input_ids = tokenizer.encode("One two three four", 128);
    let input_tensor = Tensor::from_slice(&input_ids).unsqueeze(0);

    //    Forward pass
    let output = tch::no_grad(|| {
        model
            .model()
            .forward_t(Some(&input_tensor), None, None, None, None, false)
    })?;

    assert_eq!(output.decoder_output.size(), vec!(1, 6, 50265));
    let encoder_hidden_state = output
        .encoder_hidden_state
        .ok_or_else(|| anyhow::anyhow!("missing encoder output"))?;
    assert_eq!(encoder_hidden_state.size(), vec!(1, 6, 1024));
    Ok(())
}

#[test]
#[cfg_attr(not(feature = "all-tests"), ignore)]
fn bart_large_freeze_and_generate() -> anyhow::Result<()> {
    let resources = Seq2SeqModelResources::from_hub("facebook/bart-large");
    let model = Seq2SeqModel::new(&resources, Device::Cpu)?;
    let tokenizer = resources.tokenizer(model.model_type())?;

    let frozen = model.freeze_embeddings()?;
    assert!(frozen.contains(&"model.shared.weight".to_string()));
    assert!(frozen.contains(&"model.encoder.embed_positions.weight".to_string()));
    assert!(frozen.contains(&"model.decoder.embed_positions.weight".to_string()));

    let generate_config = GenerateConfig {
        num_beams: 5,
        ..GenerateConfig::from_model_config(model.config(), &tokenizer)
    };
    let dialogue = "#Person1#: Would you like some coffee?\n#Person2#: No thanks, I prefer tea.";
    let output = BeamSearch::new(model.model(), &generate_config, model.device())
        .generate(&tokenizer.encode(dialogue, 256))?;

    assert!(output.len() as i64 <= generate_config.max_length);
    let summaries = decode_summaries(&tokenizer, &[output]);
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].is_empty());
    assert!(!summaries[0].contains('\n'));
    Ok(())
}
